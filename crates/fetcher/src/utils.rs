use std::{collections::BTreeMap, env, path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use sealevel_core::{find_config_file, load_config, ConfigSource, CONFIG_ENV_VAR, CONFIG_FILE_NAME, DEFAULT_OUTPUT_DIR};
use slog::{o, Drain, Level, Logger};
use tokio::sync::Mutex;

use crate::{
    domains::{CatalogOptions, ProviderContext, ProviderSettings, RetrieveOptions},
    timeutil::parse_utc,
    BoundingBox, CatalogQuery, HttpFetcher, RateLimiter, Result, SshError,
};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Sealevel - Sea surface height station catalogs and waterlevel retrieval"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $SEALEVEL_CONFIG, ./sealevel.toml,
    /// $XDG_CONFIG_HOME/sealevel/sealevel.toml, /etc/sealevel/sealevel.toml
    #[arg(short, long, global = true)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, global = true, env = "SEALEVEL_LEVEL")]
    pub level: Option<String>,

    /// Directory retrieved waterlevel files are written to
    #[arg(long, global = true, env = "SEALEVEL_OUTPUT_DIR")]
    pub output_dir: Option<String>,

    /// Cache for provider indexes and reanalysis archives
    #[arg(long, global = true, env = "SEALEVEL_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// Directory holding the GESLA3 metadata csv and data zip
    #[arg(long, global = true, env = "SEALEVEL_GESLA3_DIR")]
    pub gesla3_dir: Option<String>,

    /// Rate limiter refill rate in tokens per second
    #[arg(long, global = true, env = "SEALEVEL_REFILL_RATE")]
    pub refill_rate: Option<f64>,

    /// Rate limiter token capacity
    #[arg(long, global = true, env = "SEALEVEL_TOKEN_CAPACITY")]
    pub token_capacity: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "SEALEVEL_TIMEOUT")]
    pub timeout: Option<u64>,

    /// HTTP User-Agent header for provider requests
    #[arg(long, global = true, env = "SEALEVEL_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Climate Data Store API url (falls back to CDSAPI_URL and ~/.cdsapirc)
    #[arg(long, global = true, env = "SEALEVEL_CDS_URL")]
    pub cds_url: Option<String>,

    /// Climate Data Store API key (falls back to CDSAPI_KEY and ~/.cdsapirc)
    #[arg(long, global = true, env = "SEALEVEL_CDS_KEY", hide_env_values = true)]
    pub cds_key: Option<String>,

    /// Native store of the CMEMS multi-year in-situ dataset
    #[arg(long, global = true, env = "SEALEVEL_CMEMS_MY_URL")]
    pub cmems_my_url: Option<String>,

    /// Native store of the CMEMS near real time in-situ dataset
    #[arg(long, global = true, env = "SEALEVEL_CMEMS_NRT_URL")]
    pub cmems_nrt_url: Option<String>,

    /// Rijkswaterstaat water webservices base url
    #[arg(long, global = true, env = "SEALEVEL_RWS_URL")]
    pub rws_url: Option<String>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(
            self.output_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
        )
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or(5.0)
    }

    pub fn token_capacity(&self) -> usize {
        self.token_capacity.unwrap_or(10)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(120))
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("sealevel/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        let defaults = ProviderSettings::default();
        ProviderSettings {
            cache_dir: self.cache_dir.clone().map(PathBuf::from).unwrap_or(defaults.cache_dir),
            gesla3_dir: self.gesla3_dir.clone().map(PathBuf::from),
            cmems_my_url: self.cmems_my_url.clone().unwrap_or(defaults.cmems_my_url),
            cmems_nrt_url: self.cmems_nrt_url.clone().unwrap_or(defaults.cmems_nrt_url),
            rws_url: self.rws_url.clone().unwrap_or(defaults.rws_url),
            cds_url: self.cds_url.clone(),
            cds_key: self.cds_key.clone(),
        }
    }

    /// Provider context over a rate limited, retrying reqwest client
    pub fn provider_context(&self, logger: &Logger) -> Result<ProviderContext> {
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            self.token_capacity(),
            self.refill_rate(),
        )));
        let fetcher = HttpFetcher::new(logger.clone(), &self.user_agent(), self.timeout(), rate_limiter)?;
        Ok(ProviderContext::new(
            logger.clone(),
            Arc::new(fetcher),
            self.provider_settings(),
        ))
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Read, subset and export the station catalog of a source
    Catalog(CatalogArgs),
    /// Retrieve waterlevel series for every station of a catalog subset
    Retrieve(RetrieveArgs),
    /// Look up the SSC station listing an identifier of another network
    SscId(SscIdArgs),
    /// Match every station of one source to the nearest station of another
    Link(LinkArgs),
    /// Statistics over a directory of retrieved waterlevel files
    Overview(OverviewArgs),
}

#[derive(Args, Clone, Debug)]
pub struct SubsetArgs {
    /// ssc, gesla3, ioc, cmems, cmems-nrt, uhslc, psmsl-gnssir, rwsddl, gtsm3-era5-cds
    #[arg(short, long)]
    pub source: String,
    #[arg(long, default_value_t = -180.0, allow_negative_numbers = true)]
    pub lon_min: f64,
    #[arg(long, default_value_t = 180.0, allow_negative_numbers = true)]
    pub lon_max: f64,
    #[arg(long, default_value_t = -90.0, allow_negative_numbers = true)]
    pub lat_min: f64,
    #[arg(long, default_value_t = 90.0, allow_negative_numbers = true)]
    pub lat_max: f64,
    /// e.g. 2020-01-01 or 2020-01-01T12:00:00Z
    #[arg(long)]
    pub time_min: Option<String>,
    #[arg(long)]
    pub time_max: Option<String>,
    /// ssc: add positions of and distances to linked UHSLC/IOC stations
    #[arg(long)]
    pub linked_stations: bool,
    /// ioc: keep stations UHSLC already serves
    #[arg(long)]
    pub keep_uhslc: bool,
    /// ioc: keep DART buoys
    #[arg(long)]
    pub keep_dart: bool,
    /// ioc: keep stations not reporting in UTC
    #[arg(long)]
    pub keep_nonutc: bool,
    /// gesla3: keep every gauge type, not only coastal ones
    #[arg(long)]
    pub all_gauge_types: bool,
    /// cmems: reuse a cached index instead of downloading it again
    #[arg(long)]
    pub reuse_index: bool,
    /// rwsddl: metadata filter as KEY=VALUE, replaces the default filter
    #[arg(long = "rws-filter", value_name = "KEY=VALUE")]
    pub rws_filter: Vec<String>,
    /// rwsddl: look up the latest measurement time of every station
    #[arg(long)]
    pub rws_time_max: bool,
}

impl SubsetArgs {
    pub fn query(&self) -> Result<CatalogQuery> {
        Ok(CatalogQuery {
            bbox: BoundingBox::new(self.lon_min, self.lon_max, self.lat_min, self.lat_max)?,
            time_min: self.time_min.as_deref().map(parse_utc).transpose()?,
            time_max: self.time_max.as_deref().map(parse_utc).transpose()?,
        })
    }

    pub fn catalog_options(&self) -> Result<CatalogOptions> {
        let defaults = CatalogOptions::default();
        let rws_filter = if self.rws_filter.is_empty() {
            defaults.rws_filter
        } else {
            parse_filter(&self.rws_filter)?
        };
        Ok(CatalogOptions {
            linked_stations: self.linked_stations,
            drop_uhslc: !self.keep_uhslc,
            drop_dart: !self.keep_dart,
            drop_nonutc: !self.keep_nonutc,
            only_coastal: !self.all_gauge_types,
            overwrite_index: !self.reuse_index,
            rws_filter,
            rws_time_max: self.rws_time_max,
        })
    }
}

/// `KEY=VALUE` pairs into a filter map
pub fn parse_filter(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| SshError::InvalidArgument(format!("filter '{}' is not KEY=VALUE", pair)))
        })
        .collect()
}

#[derive(Args, Clone, Debug)]
pub struct CatalogArgs {
    #[command(flatten)]
    pub subset: SubsetArgs,
    /// Write `lon lat name` lines
    #[arg(long)]
    pub xyn: Option<PathBuf>,
    /// Write a KML placemark file
    #[arg(long)]
    pub kml: Option<PathBuf>,
    /// Write the catalog as CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct RetrieveArgs {
    #[command(flatten)]
    pub subset: SubsetArgs,
    /// ioc: keep full hours only
    #[arg(long)]
    pub subset_hourly: bool,
    /// uhslc: skip the research quality dataset
    #[arg(long)]
    pub no_rqds: bool,
    /// uhslc: skip the fast delivery dataset
    #[arg(long)]
    pub no_fast: bool,
    /// gtsm3-era5-cds: 10_min or hourly
    #[arg(long, default_value = "10_min")]
    pub time_freq: String,
}

impl RetrieveArgs {
    pub fn retrieve_options(&self) -> RetrieveOptions {
        RetrieveOptions {
            subset_hourly: self.subset_hourly,
            include_rqds: !self.no_rqds,
            include_fast: !self.no_fast,
            time_freq: self.time_freq.clone(),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct SscIdArgs {
    /// psmsl, ioc, ptwc, gloss or uhslc
    #[arg(short, long)]
    pub group: String,
    #[arg(long)]
    pub id: String,
}

#[derive(Args, Clone, Debug)]
pub struct LinkArgs {
    #[arg(long)]
    pub from: String,
    #[arg(long)]
    pub to: String,
    /// Drop matches further apart than this many meters
    #[arg(long)]
    pub max_distance: Option<f64>,
    /// Write the matches as CSV instead of logging them
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct OverviewArgs {
    /// Directory with waterlevel files, defaults to the output directory
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Window for the hourly availability count
    #[arg(long)]
    pub time_min: Option<String>,
    #[arg(long)]
    pub time_max: Option<String>,
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file(CONFIG_ENV_VAR, CONFIG_FILE_NAME)
    };

    let file_config: Cli = load_config(&source).unwrap_or_default();
    merge_config(cli_args, file_config)
}

/// CLI args override file config (env vars are handled by clap)
pub fn merge_config(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        output_dir: cli_args.output_dir.or(file_config.output_dir),
        cache_dir: cli_args.cache_dir.or(file_config.cache_dir),
        gesla3_dir: cli_args.gesla3_dir.or(file_config.gesla3_dir),
        refill_rate: cli_args.refill_rate.or(file_config.refill_rate),
        token_capacity: cli_args.token_capacity.or(file_config.token_capacity),
        timeout: cli_args.timeout.or(file_config.timeout),
        user_agent: cli_args.user_agent.or(file_config.user_agent),
        cds_url: cli_args.cds_url.or(file_config.cds_url),
        cds_key: cli_args.cds_key.or(file_config.cds_key),
        cmems_my_url: cli_args.cmems_my_url.or(file_config.cmems_my_url),
        cmems_nrt_url: cli_args.cmems_nrt_url.or(file_config.cmems_nrt_url),
        rws_url: cli_args.rws_url.or(file_config.rws_url),
        command: cli_args.command,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = match cli.level.as_ref() {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}
