//! PSMSL GNSS interferometric reflectometry sites, see
//! https://psmsl.org/data/gnssir/metadatainfo.php

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use async_trait::async_trait;
use geo::Point;
use serde::Deserialize;
use slog::{debug, info};
use time::OffsetDateTime;
use zip::ZipArchive;

use super::{de_f64, de_string, CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    names::psmsl_gnssir_unique_name, timeutil::parse_utc, Catalog, HttpRequest, LengthUnit, Result,
    Source, SshError, Station, StationDetails, Timeseries,
};

pub const BASE_URL: &str = "https://psmsl.org/data/gnssir/data";

pub fn sites_url() -> String {
    format!("{}/sites.json", BASE_URL)
}

pub fn site_url(station_id: &str) -> String {
    format!("{}/sites/{}.json", BASE_URL, station_id)
}

pub fn data_url(station_id: &str) -> String {
    format!("{}/main/{}.zip", BASE_URL, station_id)
}

pub fn daily_url(station_id: &str) -> String {
    format!("{}/daily/{}_daily.csv", BASE_URL, station_id)
}

#[derive(Debug, Deserialize)]
struct SiteRecord {
    #[serde(rename = "Code", deserialize_with = "de_string")]
    code: String,
    #[serde(rename = "Latitude", deserialize_with = "de_f64")]
    latitude: f64,
    #[serde(rename = "Longitude", deserialize_with = "de_f64")]
    longitude: f64,
    #[serde(rename = "CountryCode", default, deserialize_with = "de_string")]
    country: String,
}

pub fn parse_sites(body: &[u8]) -> Result<Catalog> {
    let sites: BTreeMap<String, SiteRecord> =
        serde_json::from_slice(body).map_err(|e| SshError::parse("PSMSL GNSS-IR sites", e))?;
    let mut catalog: Catalog = sites
        .into_iter()
        .map(|(station_id, site)| Station {
            source: Source::PsmslGnssir,
            station_name_unique: psmsl_gnssir_unique_name(&station_id, &site.code),
            station_name: site.code.clone(),
            station_id,
            country: site.country,
            location: Point::new(site.longitude, site.latitude),
            time_min: None,
            time_max: None,
            details: StationDetails::PsmslGnssir { code: site.code },
        })
        .collect();
    catalog.sort_by_station_id();
    Ok(catalog)
}

/// Heights that turn reflector heights into a sea level
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SiteHeights {
    #[serde(rename = "ellipsoidalHeight", deserialize_with = "de_f64")]
    pub ellipsoidal_height: f64,
    #[serde(rename = "reflectorHeight", deserialize_with = "de_f64")]
    pub reflector_height: f64,
}

#[derive(Debug, Deserialize)]
struct SiteDocument {
    properties: SiteHeights,
}

pub fn parse_site_heights(body: &[u8]) -> Result<SiteHeights> {
    let document: SiteDocument =
        serde_json::from_slice(body).map_err(|e| SshError::parse("PSMSL GNSS-IR site", e))?;
    Ok(document.properties)
}

fn time_column(headers: &csv::StringRecord, what: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == "time")
        .ok_or_else(|| SshError::parse(what, "no 'time' column"))
}

/// First and last timestamp of a daily means csv
pub fn parse_daily_extents(body: &[u8]) -> Result<Option<(OffsetDateTime, OffsetDateTime)>> {
    let mut reader = csv::ReaderBuilder::new().comment(Some(b'#')).from_reader(body);
    let col = time_column(reader.headers()?, "PSMSL GNSS-IR daily csv")?;
    let mut first = None;
    let mut last = None;
    for record in reader.records() {
        let time = parse_utc(record?.get(col).unwrap_or_default())?;
        first.get_or_insert(time);
        last = Some(time);
    }
    Ok(first.zip(last))
}

/// Sea level `adjusted_height - ellipsoidalHeight + reflectorHeight` from a
/// site csv
pub fn parse_site_data(text: &str, heights: &SiteHeights) -> Result<Timeseries> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let time_col = time_column(&headers, "PSMSL GNSS-IR data")?;
    let height_col = headers
        .iter()
        .position(|h| h == "adjusted_height")
        .ok_or_else(|| SshError::parse("PSMSL GNSS-IR data", "no 'adjusted_height' column"))?;

    let mut series = Timeseries::new(LengthUnit::Meters);
    for record in reader.records() {
        let record = record?;
        let time = parse_utc(record.get(time_col).unwrap_or_default())?;
        let value = record
            .get(height_col)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(|h| h - heights.ellipsoidal_height + heights.reflector_height);
        series.push(time, value);
    }
    Ok(series)
}

pub struct PsmslGnssirProvider {
    ctx: ProviderContext,
}

impl PsmslGnssirProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        PsmslGnssirProvider { ctx }
    }

    async fn get(&self, url: &str) -> Result<bytes::Bytes> {
        Ok(self
            .ctx
            .http
            .send(HttpRequest::get(url))
            .await?
            .error_for_status(url)?
            .body)
    }
}

#[async_trait]
impl SshProvider for PsmslGnssirProvider {
    fn source(&self) -> Source {
        Source::PsmslGnssir
    }

    async fn read_catalog(&self, _options: &CatalogOptions) -> Result<Catalog> {
        let catalog = parse_sites(&self.get(&sites_url()).await?)?;
        info!(self.ctx.logger, "read {} psmsl-gnssir stations", catalog.len());
        Ok(catalog)
    }

    /// The site list has no time ranges, they come from the daily means files
    async fn complete_time_extents(&self, mut catalog: Catalog) -> Result<Catalog> {
        info!(
            self.ctx.logger,
            "retrieving psmsl-gnssir time extents for {} stations",
            catalog.len()
        );
        for station in catalog.stations.iter_mut() {
            let body = self.get(&daily_url(&station.station_id)).await?;
            if let Some((first, last)) = parse_daily_extents(&body)? {
                station.time_min = Some(first);
                station.time_max = Some(last);
            }
            debug!(self.ctx.logger, "time extents of {}: {:?} {:?}", station.station_id, station.time_min, station.time_max);
        }
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        _options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        let archive_bytes = self.get(&data_url(&station.station_id)).await?;
        let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
        let mut text = String::new();
        archive
            .by_name(&format!("{}.csv", station.station_id))?
            .read_to_string(&mut text)?;

        let heights = parse_site_heights(&self.get(&site_url(&station.station_id)).await?)?;
        let mut series = parse_site_data(&text, &heights)?;
        series.sort_by_time();
        series.slice_time(time_min, time_max);
        if series.is_empty() {
            return Ok(None);
        }
        Ok(Some(series))
    }
}
