use std::fs::File;

use anyhow::{anyhow, Context};
use sealevel::{
    get_config_info, parse_utc, provider_for, setup_logger, ssc_id_from_other_id, ssh_catalog_subset,
    ssh_catalog_tocsv, ssh_catalog_tokmlfile, ssh_catalog_toxynfile, ssh_overview, ssh_retrieve_data,
    CatalogArgs, CatalogOptions, CatalogQuery, Cli, Command, LinkArgs, OverviewArgs, RetrieveArgs,
    Source, SscGroup, SscIdArgs,
};
use slog::{info, Logger};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(&cli);

    info!(logger, "Sealevel starting...");
    info!(logger, "  Output dir: {}", cli.output_dir().display());
    info!(logger, "  Cache dir: {}", cli.provider_settings().cache_dir.display());

    let Some(command) = cli.command.clone() else {
        return Err(anyhow!("no command given, see --help"));
    };
    match command {
        Command::Catalog(args) => catalog(&cli, &logger, args).await,
        Command::Retrieve(args) => retrieve(&cli, &logger, args).await,
        Command::SscId(args) => ssc_id(&cli, &logger, args).await,
        Command::Link(args) => link(&cli, &logger, args).await,
        Command::Overview(args) => overview(&cli, &logger, args),
    }
}

async fn catalog(cli: &Cli, logger: &Logger, args: CatalogArgs) -> Result<(), anyhow::Error> {
    let ctx = cli.provider_context(logger)?;
    let source: Source = args.subset.source.parse()?;
    let catalog = ssh_catalog_subset(
        &ctx,
        source,
        &args.subset.query()?,
        &args.subset.catalog_options()?,
    )
    .await?;

    if let Some(path) = &args.xyn {
        ssh_catalog_toxynfile(&catalog, path).with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &args.kml {
        ssh_catalog_tokmlfile(&catalog, path).with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &args.csv {
        ssh_catalog_tocsv(&catalog, path).with_context(|| format!("writing {}", path.display()))?;
    }
    if args.xyn.is_none() && args.kml.is_none() && args.csv.is_none() {
        sealevel::write_catalog_csv(&catalog, std::io::stdout())?;
    }
    Ok(())
}

async fn retrieve(cli: &Cli, logger: &Logger, args: RetrieveArgs) -> Result<(), anyhow::Error> {
    let ctx = cli.provider_context(logger)?;
    let source: Source = args.subset.source.parse()?;
    let query = args.subset.query()?;
    let catalog = ssh_catalog_subset(&ctx, source, &query, &args.subset.catalog_options()?).await?;

    let dir_output = cli.output_dir();
    let summary = ssh_retrieve_data(
        &ctx,
        &catalog,
        &dir_output,
        query.time_min,
        query.time_max,
        &args.retrieve_options(),
    )
    .await?;
    info!(
        logger,
        "retrieved {} of {} stations into {}",
        summary.written.len(),
        catalog.len(),
        dir_output.display()
    );
    Ok(())
}

async fn ssc_id(cli: &Cli, logger: &Logger, args: SscIdArgs) -> Result<(), anyhow::Error> {
    let ctx = cli.provider_context(logger)?;
    let group: SscGroup = args.group.parse()?;
    let ssc = provider_for(Source::Ssc, &ctx)
        .read_catalog(&CatalogOptions::default())
        .await?;
    let ssc_id = ssc_id_from_other_id(&ssc, &args.id, group)?;
    println!("{}", ssc_id);
    Ok(())
}

async fn link(cli: &Cli, logger: &Logger, args: LinkArgs) -> Result<(), anyhow::Error> {
    let ctx = cli.provider_context(logger)?;
    let query = CatalogQuery::default();
    let options = CatalogOptions::default();
    let from = ssh_catalog_subset(&ctx, args.from.parse()?, &query, &options).await?;
    let to = ssh_catalog_subset(&ctx, args.to.parse()?, &query, &options).await?;

    let matches = sealevel::nearest_matches(&from, &to, args.max_distance);
    info!(logger, "matched {} of {} stations", matches.len(), from.len());
    match &args.csv {
        Some(path) => {
            let mut writer = csv::Writer::from_writer(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            );
            for one in &matches {
                writer.serialize(one)?;
            }
            writer.flush()?;
        }
        None => {
            for one in &matches {
                info!(
                    logger,
                    "{} -> {} ({:.0} m)", one.from_station_name_unique, one.to_station_name_unique, one.distance_m
                );
            }
        }
    }
    Ok(())
}

fn overview(cli: &Cli, logger: &Logger, args: OverviewArgs) -> Result<(), anyhow::Error> {
    let dir = args.dir.unwrap_or_else(|| cli.output_dir());
    let time_min = args.time_min.as_deref().map(parse_utc).transpose()?;
    let time_max = args.time_max.as_deref().map(parse_utc).transpose()?;
    let path = ssh_overview(logger, &dir, time_min, time_max)?;
    info!(logger, "overview written to {}", path.display());
    Ok(())
}
