//! Copernicus Marine in-situ tide gauges, multi-year (`cmems`) and near real
//! time (`cmems-nrt`), read from the native file store of each dataset.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use geo::Point;
use slog::{debug, info, Logger};
use time::OffsetDateTime;

use super::{CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    names::{cmems_file_stem, cmems_platform_code},
    timeutil::parse_utc,
    Catalog, HttpRequest, Result, Source, SshError, Station, StationDetails, Timeseries,
};

pub const DEFAULT_MY_URL: &str = "https://s3.waw3-1.cloudferro.com/mdl-native-14/native/\
INSITU_GLO_PHY_SSH_DISCRETE_MY_013_053/cmems_obs-ins_glo_phy-ssh_my_na_PT1H_202311";
pub const DEFAULT_NRT_URL: &str = "https://s3.waw3-1.cloudferro.com/mdl-native-10/native/\
INSITU_GLO_PHYBGCWAV_DISCRETE_MYNRT_013_030/cmems_obs-ins_glo_phybgcwav_mynrt_na_irr_202311";

pub const INDEX_FILE_NAME: &str = "index_history.txt";

/// Drifts over time in the near real time dataset
const MOVING_PLATFORM: &str = "MO_TS_TG_ANDRATX";

pub fn dataset_id(source: Source) -> Result<&'static str> {
    match source {
        Source::Cmems => Ok("cmems_obs-ins_glo_phy-ssh_my_na_PT1H"),
        Source::CmemsNrt => Ok("cmems_obs-ins_glo_phybgcwav_mynrt_na_irr"),
        other => Err(SshError::InvalidArgument(format!("'{}' is not a CMEMS source", other))),
    }
}

fn column(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| SshError::parse("CMEMS index", format!("column '{}' missing", name)))
}

fn parse_coordinate(record: &csv::StringRecord, idx: usize, what: &str) -> Result<f64> {
    record
        .get(idx)
        .unwrap_or_default()
        .trim()
        .parse::<f64>()
        .map_err(|e| SshError::parse(format!("CMEMS index {}", what), e))
}

/// Tide gauge files with sea level in an `index_history.txt`. The column
/// names are on the last `#` line before the records.
pub fn parse_index(text: &str, source: Source) -> Result<Catalog> {
    let header_line = text
        .lines()
        .take_while(|line| line.starts_with('#'))
        .last()
        .ok_or_else(|| SshError::parse("CMEMS index", "no header line"))?;
    let headers: Vec<String> = header_line
        .trim_start_matches('#')
        .trim()
        .split(',')
        .map(|h| h.trim().to_string())
        .collect();

    let file_col = column(&headers, "file_name")?;
    let lat_min = column(&headers, "geospatial_lat_min")?;
    let lat_max = column(&headers, "geospatial_lat_max")?;
    let lon_min = column(&headers, "geospatial_lon_min")?;
    let lon_max = column(&headers, "geospatial_lon_max")?;
    let start_col = column(&headers, "time_coverage_start")?;
    let end_col = column(&headers, "time_coverage_end")?;
    let params_col = column(&headers, "parameters")?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut stations = vec![];
    for record in reader.records() {
        let record = record?;
        let file_name = record.get(file_col).unwrap_or_default().trim();
        let parameters = record.get(params_col).unwrap_or_default();
        if !file_name.contains("/history/TG/") || !parameters.contains("SLEV") {
            continue;
        }
        if source == Source::CmemsNrt && file_name.contains(MOVING_PLATFORM) {
            continue;
        }

        let lon = parse_coordinate(&record, lon_min, "longitude")?;
        let lat = parse_coordinate(&record, lat_min, "latitude")?;
        if lon != parse_coordinate(&record, lon_max, "longitude")?
            || lat != parse_coordinate(&record, lat_max, "latitude")?
        {
            return Err(SshError::Provider(format!(
                "CMEMS platform in '{}' is not at a fixed position",
                file_name
            )));
        }

        let stem = cmems_file_stem(file_name);
        let platform = cmems_platform_code(&stem);
        stations.push(Station {
            source,
            station_id: platform.clone(),
            station_name: platform,
            station_name_unique: stem,
            country: String::new(),
            location: Point::new(lon, lat),
            time_min: Some(parse_utc(record.get(start_col).unwrap_or_default())?),
            time_max: Some(parse_utc(record.get(end_col).unwrap_or_default())?),
            details: StationDetails::Cmems {
                file_name: file_name.to_string(),
            },
        });
    }
    Ok(Catalog::new(stations))
}

/// Location of a history file inside the native store of the dataset
pub fn file_url(base_url: &str, file_name: &str) -> Result<String> {
    let (_, relative) = file_name.split_once("/history/").ok_or_else(|| {
        SshError::parse("CMEMS file name", format!("'{}' is not a history file", file_name))
    })?;
    Ok(format!("{}/history/{}", base_url.trim_end_matches('/'), relative))
}

pub struct CmemsProvider {
    ctx: ProviderContext,
    source: Source,
}

impl CmemsProvider {
    pub fn new(ctx: ProviderContext, source: Source) -> Self {
        CmemsProvider { ctx, source }
    }

    fn base_url(&self) -> &str {
        match self.source {
            Source::CmemsNrt => &self.ctx.settings.cmems_nrt_url,
            _ => &self.ctx.settings.cmems_my_url,
        }
    }

    fn index_path(&self) -> Result<PathBuf> {
        Ok(self
            .ctx
            .settings
            .cache_dir
            .join(dataset_id(self.source)?)
            .join(INDEX_FILE_NAME))
    }

    async fn cached_index(&self, overwrite: bool) -> Result<String> {
        let path = self.index_path()?;
        if !overwrite && path.exists() {
            info!(
                self.ctx.logger,
                "using cached CMEMS index for '{}': {}",
                dataset_id(self.source)?,
                path.display()
            );
            return Ok(std::fs::read_to_string(&path)?);
        }

        let url = format!("{}/{}", self.base_url().trim_end_matches('/'), INDEX_FILE_NAME);
        let response = self
            .ctx
            .http
            .send(HttpRequest::get(&url))
            .await?
            .error_for_status(&url)?;
        if let Some(dir) = path.parent() {
            sealevel_core::create_dir_all(dir)?;
        }
        std::fs::write(&path, &response.body)?;
        debug!(self.ctx.logger, "cached {} at {}", url, path.display());
        Ok(response.text())
    }
}

#[async_trait]
impl SshProvider for CmemsProvider {
    fn source(&self) -> Source {
        self.source
    }

    async fn read_catalog(&self, options: &CatalogOptions) -> Result<Catalog> {
        let text = self.cached_index(options.overwrite_index).await?;
        let catalog = parse_index(&text, self.source)?;
        info!(self.ctx.logger, "read {} {} stations", catalog.len(), self.source);
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        _options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        if !cfg!(feature = "netcdf") {
            return Err(SshError::FeatureDisabled {
                feature: "netcdf",
                source_name: self.source,
            });
        }
        let StationDetails::Cmems { file_name } = &station.details else {
            return Err(SshError::InvalidArgument(format!(
                "station '{}' carries no CMEMS file name",
                station.station_name_unique
            )));
        };
        let url = file_url(self.base_url(), file_name)?;
        let response = self
            .ctx
            .http
            .send(HttpRequest::get(&url))
            .await?
            .error_for_status(&url)?;

        let path = std::env::temp_dir().join(format!(
            "sealevel_cmems_{}_{}.nc",
            std::process::id(),
            station.station_name_unique
        ));
        std::fs::write(&path, &response.body)?;
        let series = read_history_file(&path, &self.ctx.logger, self.source);
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(self.ctx.logger, "could not remove {}: {}", path.display(), e);
        }

        let mut series = series?;
        series.slice_time(time_min, time_max);
        if series.is_empty() {
            return Ok(None);
        }
        Ok(Some(series))
    }
}

/// SLEV per time step from TIME-major `slev` and `qc` with `ntime` rows.
/// Each variable is reduced to its maximum over the remaining (DEPTH) axis,
/// then SLEV is kept only where the reduced quality flag is 1.
pub fn reduce_depth(slev: &[f64], qc: &[f64], ntime: usize) -> Result<Vec<Option<f64>>> {
    if ntime == 0 {
        return Ok(vec![]);
    }
    if slev.len() != qc.len() || slev.len() % ntime != 0 {
        return Err(SshError::parse(
            "CMEMS SLEV",
            format!("{} SLEV and {} SLEV_QC values for {} times", slev.len(), qc.len(), ntime),
        ));
    }
    let per_time = slev.len() / ntime;
    Ok((0..ntime)
        .map(|i| {
            let range = i * per_time..(i + 1) * per_time;
            let flag = super::nc::max_finite(&qc[range.clone()]);
            super::nc::max_finite(&slev[range]).filter(|_| flag == Some(1.0))
        })
        .collect())
}

#[cfg(feature = "netcdf")]
fn read_history_file(path: &Path, logger: &Logger, _source: Source) -> Result<Timeseries> {
    use super::nc;
    use crate::LengthUnit;

    let file = netcdf::open(path)?;
    let times = nc::read_times(&nc::variable(&file, "TIME")?)?;
    let slev_var = nc::variable(&file, "SLEV")?;
    let qc_var = nc::variable(&file, "SLEV_QC")?;
    if slev_var.dimensions().first().map(|d| d.name()) != Some("TIME".to_string()) {
        return Err(SshError::parse("CMEMS SLEV", "expected TIME as first dimension"));
    }
    let slev = nc::unpack(&slev_var, slev_var.get_values::<f64, _>(..)?);
    let qc = nc::unpack(&qc_var, qc_var.get_values::<f64, _>(..)?);
    debug!(logger, "reading {} SLEV values for {} times", slev.len(), times.len());

    let values = reduce_depth(&slev, &qc, times.len())?;
    let mut series = Timeseries::new(LengthUnit::Meters);
    let mut missing_times = 0;
    for (time, value) in times.into_iter().zip(values) {
        match time {
            Some(time) => series.push(time, value),
            None => missing_times += 1,
        }
    }
    if missing_times > 0 {
        debug!(logger, "skipped {} samples without time", missing_times);
    }
    Ok(series)
}

#[cfg(not(feature = "netcdf"))]
fn read_history_file(_path: &Path, _logger: &Logger, source: Source) -> Result<Timeseries> {
    Err(SshError::FeatureDisabled {
        feature: "netcdf",
        source_name: source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const INDEX: &str = "\
# Title : In Situ observation
# Description : history index
#catalog_id,file_name,geospatial_lat_min,geospatial_lat_max,geospatial_lon_min,geospatial_lon_max,time_coverage_start,time_coverage_end,provider,date_update,data_mode,parameters
COP-GLOBAL-01,ftp://my.cmems-du.eu/Core/X/history/TG/NO_TS_TG_Bergen.nc,60.398,60.398,5.320,5.320,1915-01-01T00:00:00Z,2023-01-01T00:00:00Z,Norwegian Mapping Authority,2023-11-01T00:00:00Z,R,DEPH SLEV
COP-GLOBAL-01,ftp://my.cmems-du.eu/Core/X/history/MO/NO_TS_MO_Buoy.nc,60.1,60.2,5.3,5.4,2000-01-01T00:00:00Z,2020-01-01T00:00:00Z,Met,2023-11-01T00:00:00Z,R,TEMP
COP-GLOBAL-01,ftp://my.cmems-du.eu/Core/X/history/TG/FR_TS_TG_Brest.nc,48.383,48.383,-4.495,-4.495,1846-01-04T00:00:00Z,2023-06-01T00:00:00Z,SHOM,2023-11-01T00:00:00Z,R,TEMP
COP-GLOBAL-01,ftp://my.cmems-du.eu/Core/X/history/TG/MO_TS_TG_ANDRATX.nc,39.54,39.55,2.38,2.38,2010-01-01T00:00:00Z,2023-06-01T00:00:00Z,SOCIB,2023-11-01T00:00:00Z,R,SLEV
";

    #[test]
    fn reduces_depth_and_keeps_good_quality() {
        let nan = f64::NAN;
        // 4 times x 2 depths
        let slev = [1.0, 1.2, nan, 0.8, 2.0, 2.1, 3.0, 3.3];
        let qc = [1.0, 1.0, nan, 1.0, 2.0, 1.0, nan, nan];
        let values = reduce_depth(&slev, &qc, 4).unwrap();
        assert_eq!(values, vec![Some(1.2), Some(0.8), None, None]);

        // single depth
        let values = reduce_depth(&[0.5, 0.6], &[1.0, 4.0], 2).unwrap();
        assert_eq!(values, vec![Some(0.5), None]);

        assert!(reduce_depth(&[], &[], 0).unwrap().is_empty());
        assert!(reduce_depth(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0], 2).is_err());
        assert!(reduce_depth(&[1.0, 2.0], &[1.0], 2).is_err());
    }

    #[test]
    fn parses_tide_gauges_with_sea_level() {
        // the moving platform is only skipped in the near real time dataset
        assert!(parse_index(INDEX, Source::Cmems).is_err());

        let catalog = parse_index(INDEX, Source::CmemsNrt).unwrap();
        assert_eq!(catalog.len(), 1);
        let bergen = &catalog.stations[0];
        assert_eq!(bergen.station_id, "Bergen");
        assert_eq!(bergen.station_name_unique, "NO_TS_TG_Bergen");
        assert_eq!(bergen.source, Source::CmemsNrt);
        assert_eq!(bergen.time_min, Some(datetime!(1915-01-01 0:00 UTC)));
        assert_eq!(bergen.latitude(), 60.398);
    }

    #[test]
    fn maps_history_file_into_native_store() {
        let url = file_url(
            "https://example.org/native/dataset_202311/",
            "ftp://my.cmems-du.eu/Core/X/history/TG/NO_TS_TG_Bergen.nc",
        )
        .unwrap();
        assert_eq!(url, "https://example.org/native/dataset_202311/history/TG/NO_TS_TG_Bergen.nc");
        assert!(file_url("https://example.org", "NO_TS_TG_Bergen.nc").is_err());
    }

    #[test]
    fn dataset_ids_per_source() {
        assert_eq!(dataset_id(Source::Cmems).unwrap(), "cmems_obs-ins_glo_phy-ssh_my_na_PT1H");
        assert!(dataset_id(Source::Ioc).is_err());
    }
}
