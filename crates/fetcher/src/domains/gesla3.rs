//! GESLA-3 (Global Extreme Sea Level Analysis) from a local copy of the
//! metadata csv and the zipped data archive.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use geo::Point;
use slog::{info, warn};
use time::OffsetDateTime;
use zip::ZipArchive;

use super::{CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    timeutil::parse_utc, Catalog, LengthUnit, Result, Source, SshError, Station, StationDetails,
    Timeseries,
};

pub const META_FILE_NAME: &str = "GESLA3_ALL 2.csv";
pub const DATA_FILE_NAME: &str = "GESLA3.0_ALL.zip";
const DOWNLOAD_HINT: &str = "You can download it from https://gesla787883612.wordpress.com/downloads \
and point 'gesla3_dir' (or SEALEVEL_GESLA3_DIR) at its directory";

/// `START DATE/TIME` becomes `start_date_time`
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .replace(' ', "_")
        .replace(['(', ')'], "")
        .replace('/', "_")
        .to_lowercase()
}

fn field<'r>(record: &'r csv::StringRecord, headers: &[String], name: &str) -> Result<&'r str> {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|idx| record.get(idx))
        .map(str::trim)
        .ok_or_else(|| SshError::parse("GESLA3 metadata", format!("column '{}' missing", name)))
}

fn number(value: &str, what: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| SshError::parse(format!("GESLA3 {}", what), e))
}

pub fn parse_metadata<R: Read>(reader: R, only_coastal: bool) -> Result<Catalog> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    let mut stations = vec![];
    for record in reader.records() {
        let record = record?;
        let gauge_type = field(&record, &headers, "gauge_type")?.to_string();
        if only_coastal && gauge_type != "Coastal" {
            continue;
        }
        let file_name = field(&record, &headers, "file_name")?.to_string();
        let null_value = field(&record, &headers, "null_value")
            .ok()
            .and_then(|v| v.parse::<f64>().ok());

        stations.push(Station {
            source: Source::Gesla3,
            station_id: file_name.clone(),
            station_name: field(&record, &headers, "site_name")?.to_string(),
            station_name_unique: file_name,
            country: field(&record, &headers, "country")?.to_string(),
            location: Point::new(
                number(field(&record, &headers, "longitude")?, "longitude")?,
                number(field(&record, &headers, "latitude")?, "latitude")?,
            ),
            time_min: Some(parse_utc(field(&record, &headers, "start_date_time")?)?),
            time_max: Some(parse_utc(field(&record, &headers, "end_date_time")?)?),
            details: StationDetails::Gesla3 {
                gauge_type,
                null_value,
            },
        });
    }
    Ok(Catalog::new(stations))
}

/// Parsed data file: the series and the number of dropped repeated timestamps
#[derive(Debug)]
pub struct Gesla3Data {
    pub series: Timeseries,
    pub qc_flags: Vec<u8>,
    pub duplicates: usize,
}

/// Whitespace separated `date time sea_level qc_flag use_flag` records,
/// `#` lines are header. Repeated timestamps keep their first record.
pub fn parse_data(text: &str) -> Result<Gesla3Data> {
    let mut series = Timeseries::new(LengthUnit::Meters);
    let mut qc_flags = vec![];
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [date, time, level, qc, ..] = parts.as_slice() else {
            return Err(SshError::parse("GESLA3 data", format!("short record '{}'", line)));
        };
        series.push(parse_utc(&format!("{} {}", date, time))?, Some(number(level, "sea_level")?));
        qc_flags.push(qc.parse::<u8>().map_err(|e| SshError::parse("GESLA3 qc_flag", e))?);
    }

    // dedupe on the pairs so flags stay aligned with their samples
    let total = series.len();
    let mut seen = std::collections::HashSet::with_capacity(total);
    let mut kept = Vec::with_capacity(total);
    let mut kept_flags = Vec::with_capacity(total);
    for (sample, flag) in series.samples.into_iter().zip(qc_flags) {
        if seen.insert(sample.time) {
            kept.push(sample);
            kept_flags.push(flag);
        }
    }
    Ok(Gesla3Data {
        duplicates: total - kept.len(),
        series: Timeseries::from_samples(kept, LengthUnit::Meters),
        qc_flags: kept_flags,
    })
}

pub struct Gesla3Provider {
    ctx: ProviderContext,
    archive: Mutex<Option<ZipArchive<File>>>,
}

impl Gesla3Provider {
    pub fn new(ctx: ProviderContext) -> Self {
        Gesla3Provider {
            ctx,
            archive: Mutex::new(None),
        }
    }

    fn local_file(&self, name: &str) -> Result<PathBuf> {
        let dir = self.ctx.settings.gesla3_dir.as_deref().unwrap_or(Path::new("."));
        let path = dir.join(name);
        if !path.is_file() {
            return Err(SshError::FileNotFound {
                path: path.display().to_string(),
                hint: DOWNLOAD_HINT.to_string(),
            });
        }
        Ok(path)
    }

    fn read_member(&self, name: &str) -> Result<String> {
        let mut guard = self
            .archive
            .lock()
            .map_err(|_| SshError::Provider("GESLA3 archive lock poisoned".to_string()))?;
        if guard.is_none() {
            let path = self.local_file(DATA_FILE_NAME)?;
            *guard = Some(ZipArchive::new(File::open(path)?)?);
        }
        let Some(archive) = guard.as_mut() else {
            return Err(SshError::Provider("GESLA3 archive not opened".to_string()));
        };
        let mut member = archive.by_name(name)?;
        let mut text = String::new();
        member.read_to_string(&mut text)?;
        Ok(text)
    }
}

#[async_trait]
impl SshProvider for Gesla3Provider {
    fn source(&self) -> Source {
        Source::Gesla3
    }

    async fn read_catalog(&self, options: &CatalogOptions) -> Result<Catalog> {
        let path = self.local_file(META_FILE_NAME)?;
        let catalog = parse_metadata(File::open(path)?, options.only_coastal)?;
        info!(self.ctx.logger, "read {} gesla3 stations", catalog.len());
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        _options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        let text = self.read_member(&station.station_id)?;
        let Gesla3Data {
            mut series,
            qc_flags,
            duplicates,
        } = parse_data(&text)?;
        if duplicates > 0 {
            warn!(self.ctx.logger, "{} duplicate timestamps removed from {}", duplicates, station.station_id);
        }

        let null_value = match &station.details {
            StationDetails::Gesla3 { null_value, .. } => *null_value,
            _ => None,
        };
        for (sample, flag) in series.samples.iter_mut().zip(&qc_flags) {
            let is_null = null_value.is_some_and(|null| sample.value == Some(null));
            if *flag != 1 || is_null {
                sample.value = None;
            }
        }

        series.slice_time(time_min, time_max);
        if series.is_empty() {
            return Ok(None);
        }
        Ok(Some(series))
    }
}
