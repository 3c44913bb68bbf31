//! GTSM3 reanalysis (ERA5 forced) total water levels from the Copernicus
//! Climate Data Store. The CDS only hands out whole months for all output
//! locations, so monthly files are cached and the station is sliced locally.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use geo::Point;
use serde::Deserialize;
use serde_json::json;
use slog::{debug, info, Logger};
use time::{macros::datetime, OffsetDateTime};
use zip::ZipArchive;

use super::{
    cds::{resolve_credentials, CdsClient},
    de_f64, de_string, CatalogOptions, ProviderContext, RetrieveOptions, SshProvider,
};
use crate::{
    names::gtsm3_era5_unique_name, timeutil::month_periods, Catalog, HttpRequest, Result, Source, SshError,
    Station, StationDetails, Timeseries,
};

pub const LOCATIONS_URL: &str = "https://raw.githubusercontent.com/VU-IVM/gtsm3-era5-nrt/refs/heads/main/\
04_supplementary_data/GTSM_output_locations_list.csv";
pub const CDS_DATASET: &str = "sis-water-level-change-timeseries-cmip6";
pub const CACHE_DIR_NAME: &str = "gtsm3_era5_cds";
pub const TIME_FREQUENCIES: [&str; 2] = ["10_min", "hourly"];

pub const TIME_MIN: OffsetDateTime = datetime!(1950-01-01 0:00 UTC);
pub const TIME_MAX: OffsetDateTime = datetime!(2024-12-31 0:00 UTC);

#[derive(Debug, Deserialize)]
struct LocationRecord {
    #[serde(deserialize_with = "de_string")]
    station_id: String,
    #[serde(default, deserialize_with = "de_string")]
    station_name: String,
    #[serde(deserialize_with = "de_f64")]
    lon: f64,
    #[serde(deserialize_with = "de_f64")]
    lat: f64,
}

pub fn parse_locations(body: &[u8]) -> Result<Catalog> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(body);
    let mut stations = vec![];
    for record in reader.deserialize::<LocationRecord>() {
        let record = record?;
        stations.push(Station {
            source: Source::Gtsm3Era5Cds,
            station_name_unique: gtsm3_era5_unique_name(&record.station_id, &record.station_name),
            station_id: record.station_id,
            station_name: record.station_name,
            country: String::new(),
            location: Point::new(record.lon, record.lat),
            time_min: Some(TIME_MIN),
            time_max: Some(TIME_MAX),
            details: StationDetails::None,
        });
    }
    Ok(Catalog::new(stations))
}

pub fn check_time_freq(time_freq: &str) -> Result<()> {
    if TIME_FREQUENCIES.contains(&time_freq) {
        return Ok(());
    }
    Err(SshError::InvalidArgument(format!(
        "time frequency for retrieving gtsm3-era5-cds data should be one of {:?}, received '{}'",
        TIME_FREQUENCIES, time_freq
    )))
}

/// `reanalysis_waterlevel_10min_1979_01_v2.nc`
pub fn month_file_name(time_freq: &str, month_start: OffsetDateTime) -> String {
    format!(
        "reanalysis_waterlevel_{}_{:04}_{:02}_v2.nc",
        time_freq.replace('_', ""),
        month_start.year(),
        u8::from(month_start.month())
    )
}

pub fn cds_inputs(time_freq: &str, month_start: OffsetDateTime) -> serde_json::Value {
    json!({
        "variable": ["total_water_level"],
        "experiment": ["reanalysis"],
        "temporal_aggregation": [time_freq],
        "year": [format!("{:04}", month_start.year())],
        "month": [format!("{:02}", u8::from(month_start.month()))],
    })
}

fn extract_archive(zip_path: &Path, dir: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(std::fs::File::open(zip_path)?)?;
    archive.extract(dir)?;
    Ok(())
}

pub struct Gtsm3Era5Provider {
    ctx: ProviderContext,
}

impl Gtsm3Era5Provider {
    pub fn new(ctx: ProviderContext) -> Self {
        Gtsm3Era5Provider { ctx }
    }

    fn cache_dir(&self) -> PathBuf {
        self.ctx.settings.cache_dir.join(CACHE_DIR_NAME)
    }

    /// Monthly files covering the window, downloaded when not cached yet
    async fn month_files(
        &self,
        time_min: OffsetDateTime,
        time_max: OffsetDateTime,
        time_freq: &str,
    ) -> Result<Vec<PathBuf>> {
        let dir = self.cache_dir();
        sealevel_core::create_dir_all(&dir)?;

        let mut client = None;
        let mut files = vec![];
        for (month_start, _) in month_periods(time_min, time_max) {
            let path = dir.join(month_file_name(time_freq, month_start));
            if path.is_file() {
                debug!(self.ctx.logger, "using cached {}", path.display());
            } else {
                info!(self.ctx.logger, "retrieving GTSM3-ERA5-CDS data for {}-{:02}", month_start.year(), u8::from(month_start.month()));
                if client.is_none() {
                    let credentials = resolve_credentials(
                        self.ctx.settings.cds_url.as_deref(),
                        self.ctx.settings.cds_key.as_deref(),
                    )?;
                    client = Some(CdsClient::new(self.ctx.logger.clone(), self.ctx.http.clone(), credentials));
                }
                let Some(cds) = client.as_ref() else {
                    continue;
                };
                let zip_path = path.with_extension("zip");
                cds.retrieve(CDS_DATASET, cds_inputs(time_freq, month_start), &zip_path)
                    .await?;
                extract_archive(&zip_path, &dir)?;
                std::fs::remove_file(&zip_path)?;
            }
            files.push(path);
        }
        Ok(files)
    }
}

#[async_trait]
impl SshProvider for Gtsm3Era5Provider {
    fn source(&self) -> Source {
        Source::Gtsm3Era5Cds
    }

    async fn read_catalog(&self, _options: &CatalogOptions) -> Result<Catalog> {
        let response = self
            .ctx
            .http
            .send(HttpRequest::get(LOCATIONS_URL))
            .await?
            .error_for_status(LOCATIONS_URL)?;
        let catalog = parse_locations(&response.body)?;
        info!(self.ctx.logger, "read {} gtsm3-era5 output locations", catalog.len());
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        check_time_freq(&options.time_freq)?;
        if !cfg!(feature = "netcdf") {
            return Err(SshError::FeatureDisabled {
                feature: "netcdf",
                source_name: Source::Gtsm3Era5Cds,
            });
        }
        let time_min = time_min.or(station.time_min).unwrap_or(TIME_MIN);
        let time_max = time_max.or(station.time_max).unwrap_or(TIME_MAX);

        let files = self.month_files(time_min, time_max, &options.time_freq).await?;
        let mut parts = Vec::with_capacity(files.len());
        for path in &files {
            parts.push(read_station(path, &station.station_id, &self.ctx.logger)?);
        }
        let mut series = Timeseries::merge_prefer_first(parts);
        series.sort_by_time();
        series.slice_time(Some(time_min), Some(time_max));
        if series.is_empty() {
            return Ok(None);
        }
        Ok(Some(series.into_meters()))
    }
}

/// Position of `station_id` in the `stations` variable of a monthly file
pub fn station_index(ids: &[i64], station_id: &str) -> Result<usize> {
    let wanted: i64 = station_id
        .trim()
        .parse()
        .map_err(|e| SshError::parse(format!("GTSM station id '{}'", station_id), e))?;
    ids.iter()
        .position(|id| *id == wanted)
        .ok_or_else(|| SshError::Provider(format!("station {} not in file", station_id)))
}

/// Waterlevel of one output location in a monthly file
#[cfg(feature = "netcdf")]
fn read_station(path: &Path, station_id: &str, logger: &Logger) -> Result<Timeseries> {
    use super::nc;
    use crate::LengthUnit;

    let file = netcdf::open(path)?;
    let times = nc::read_times(&nc::variable(&file, "time")?)?;
    let ids: Vec<i64> = nc::variable(&file, "stations")?.get_values::<i64, _>(..)?;
    let index = station_index(&ids, station_id).map_err(|e| match e {
        SshError::Provider(message) => SshError::Provider(format!("{}: {}", message, path.display())),
        other => other,
    })?;

    let var = nc::variable(&file, "waterlevel")?;
    let time_first = var.dimensions().first().map(|d| d.name()) == Some("time".to_string());
    let raw = if time_first {
        var.get_values::<f64, _>((.., index))?
    } else {
        var.get_values::<f64, _>((index, ..))?
    };
    let unit = nc::attr_str(&var, "units")
        .and_then(|u| LengthUnit::parse(&u))
        .unwrap_or(LengthUnit::Meters);
    debug!(logger, "read {} values of station {} from {}", raw.len(), station_id, path.display());

    let values = nc::unpack(&var, raw);
    let mut series = Timeseries::new(unit);
    for (time, value) in times.into_iter().zip(values) {
        if let Some(time) = time {
            series.push(time, Some(value).filter(|v| v.is_finite()));
        }
    }
    Ok(series)
}

#[cfg(not(feature = "netcdf"))]
fn read_station(_path: &Path, _station_id: &str, _logger: &Logger) -> Result<Timeseries> {
    Err(SshError::FeatureDisabled {
        feature: "netcdf",
        source_name: Source::Gtsm3Era5Cds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_station_column() {
        let ids = [0, 1, 20, 3452];
        assert_eq!(station_index(&ids, "20").unwrap(), 2);
        assert_eq!(station_index(&ids, " 3452").unwrap(), 3);
        assert!(matches!(station_index(&ids, "7"), Err(SshError::Provider(_))));
        assert!(matches!(station_index(&ids, "id_coast"), Err(SshError::Parse { .. })));
    }

    #[test]
    fn reads_tab_separated_locations() {
        let body = b"station_id\tstation_name\tlon\tlat\n1\tid_coast_glob_eur_03452\t-5.5\t50.1\n20\tx\t12.25\t-3.5\n";
        let catalog = parse_locations(body).unwrap();
        assert_eq!(catalog.len(), 2);
        let station = &catalog.stations[0];
        assert_eq!(station.station_name_unique, "gtsm3-era5-1-id_coast_glob_eur_03452");
        assert_eq!(station.country, "");
        assert_eq!(station.time_min, Some(TIME_MIN));
        assert_eq!(station.time_max, Some(TIME_MAX));
        assert_eq!(catalog.stations[1].latitude(), -3.5);
    }

    #[test]
    fn monthly_cache_names() {
        let month = datetime!(1979-01-01 0:00 UTC);
        assert_eq!(month_file_name("10_min", month), "reanalysis_waterlevel_10min_1979_01_v2.nc");
        assert_eq!(month_file_name("hourly", month), "reanalysis_waterlevel_hourly_1979_01_v2.nc");
        let inputs = cds_inputs("hourly", month);
        assert_eq!(inputs["month"][0], "01");
        assert_eq!(inputs["temporal_aggregation"][0], "hourly");
    }

    #[test]
    fn only_known_frequencies() {
        assert!(check_time_freq("10_min").is_ok());
        assert!(check_time_freq("hourly").is_ok());
        assert!(matches!(check_time_freq("daily"), Err(SshError::InvalidArgument(_))));
    }
}
