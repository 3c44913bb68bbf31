//! University of Hawaii Sea Level Center: station metadata from the GeoJSON
//! listing, hourly data from the research quality (rqds) and fast delivery
//! ERDDAP tables.

use async_trait::async_trait;
use geo::Point;
use serde::Deserialize;
use slog::{debug, info, Logger};
use time::OffsetDateTime;

use super::{de_string, CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    crs::lon_360_to_180,
    names::{remove_accents, uhslc_unique_name},
    timeutil::{format_utc, parse_utc},
    Catalog, HttpRequest, LengthUnit, Result, Source, SshError, Station, StationDetails, Timeseries,
};

pub const META_URL: &str = "https://uhslc.soest.hawaii.edu/data/meta.geojson";
pub const ERDDAP_URL: &str = "https://uhslc.soest.hawaii.edu/erddap";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UhslcDataset {
    ResearchQuality,
    FastDelivery,
}

impl UhslcDataset {
    pub fn dataset_id(&self) -> &'static str {
        match self {
            UhslcDataset::ResearchQuality => "global_hourly_rqds",
            UhslcDataset::FastDelivery => "global_hourly_fast",
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    uhslc_id: u32,
    name: String,
    #[serde(default, deserialize_with = "de_string")]
    country: String,
    #[serde(default)]
    rq_span: Option<Span>,
    #[serde(default)]
    fd_span: Option<Span>,
}

#[derive(Debug, Default, Deserialize)]
struct Span {
    #[serde(default)]
    oldest: Option<String>,
    #[serde(default)]
    latest: Option<String>,
}

fn span_bounds(spans: [&Option<Span>; 2], oldest: bool) -> Vec<OffsetDateTime> {
    spans
        .into_iter()
        .flatten()
        .filter_map(|span| if oldest { span.oldest.as_deref() } else { span.latest.as_deref() })
        .filter_map(|value| parse_utc(value).ok())
        .collect()
}

/// Stations of the UHSLC GeoJSON listing. Longitudes are shifted from 0..360
/// to -180..180; time extents cover both the rqds and the fast spans.
pub fn parse_catalog(body: &[u8], logger: &Logger) -> Result<Catalog> {
    let collection: FeatureCollection =
        serde_json::from_slice(body).map_err(|e| SshError::parse("UHSLC metadata", e))?;

    let mut stations = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some((lon, lat)) = feature
            .geometry
            .as_ref()
            .and_then(|g| Some((*g.coordinates.first()?, *g.coordinates.get(1)?)))
        else {
            debug!(logger, "skipping uhslc station {} without geometry", feature.properties.uhslc_id);
            continue;
        };
        let props = feature.properties;
        let spans = [&props.rq_span, &props.fd_span];
        let time_min = span_bounds(spans, true).into_iter().min();
        let time_max = span_bounds(spans, false).into_iter().max();

        stations.push(Station {
            source: Source::Uhslc,
            station_id: props.uhslc_id.to_string(),
            station_name: remove_accents(&props.name, logger),
            station_name_unique: uhslc_unique_name(props.uhslc_id),
            country: props.country,
            location: Point::new(lon_360_to_180(lon), lat),
            time_min,
            time_max,
            details: StationDetails::None,
        });
    }
    Ok(Catalog::new(stations))
}

pub fn erddap_url(
    dataset: UhslcDataset,
    uhslc_id: &str,
    time_min: Option<OffsetDateTime>,
    time_max: Option<OffsetDateTime>,
) -> Result<String> {
    let mut url = format!(
        "{}/tabledap/{}.csv?time,sea_level&uhslc_id={}",
        ERDDAP_URL,
        dataset.dataset_id(),
        uhslc_id
    );
    if let Some(min) = time_min {
        url.push_str(&format!("&time%3E={}", format_utc(min)?));
    }
    if let Some(max) = time_max {
        url.push_str(&format!("&time%3C={}", format_utc(max)?));
    }
    Ok(url)
}

/// ERDDAP csv: a header row, a units row, then `time,sea_level` records in mm
pub fn parse_erddap_csv(body: &[u8]) -> Result<Timeseries> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body);
    let headers = reader.headers()?.clone();
    let time_col = headers.iter().position(|h| h == "time");
    let level_col = headers.iter().position(|h| h == "sea_level");
    let (Some(time_col), Some(level_col)) = (time_col, level_col) else {
        return Err(SshError::parse("UHSLC ERDDAP csv", format!("unexpected header {:?}", headers)));
    };

    let mut records = reader.records();
    let units = records
        .next()
        .ok_or_else(|| SshError::parse("UHSLC ERDDAP csv", "missing units row"))??;
    let unit = units.get(level_col).unwrap_or_default();
    if unit != "millimeters" {
        return Err(SshError::Provider(format!(
            "UHSLC sea_level in '{}', expected millimeters",
            unit
        )));
    }

    let mut series = Timeseries::new(LengthUnit::Millimeters);
    for record in records {
        let record = record?;
        let time = parse_utc(record.get(time_col).unwrap_or_default())?;
        let value = record
            .get(level_col)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite());
        series.push(time, value);
    }
    Ok(series)
}

pub struct UhslcProvider {
    ctx: ProviderContext,
}

impl UhslcProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        UhslcProvider { ctx }
    }

    pub async fn fetch_catalog(&self) -> Result<Catalog> {
        let response = self
            .ctx
            .http
            .send(HttpRequest::get(META_URL))
            .await?
            .error_for_status(META_URL)?;
        parse_catalog(&response.body, &self.ctx.logger)
    }

    /// `None` when ERDDAP answers 404, i.e. no rows match the constraints
    async fn fetch_dataset(
        &self,
        dataset: UhslcDataset,
        uhslc_id: &str,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
    ) -> Result<Option<Timeseries>> {
        let url = erddap_url(dataset, uhslc_id, time_min, time_max)?;
        let response = self.ctx.http.send(HttpRequest::get(&url)).await?;
        if response.is_not_found() {
            debug!(self.ctx.logger, "no {} data for uhslc {}", dataset.dataset_id(), uhslc_id);
            return Ok(None);
        }
        let response = response.error_for_status(&url)?;
        let mut series = parse_erddap_csv(&response.body)?;
        series.round_times_to_seconds();
        Ok(Some(series))
    }
}

#[async_trait]
impl SshProvider for UhslcProvider {
    fn source(&self) -> Source {
        Source::Uhslc
    }

    async fn read_catalog(&self, _options: &CatalogOptions) -> Result<Catalog> {
        let catalog = self.fetch_catalog().await?;
        info!(self.ctx.logger, "read {} uhslc stations", catalog.len());
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        let mut datasets = vec![];
        if options.include_rqds {
            datasets.push(UhslcDataset::ResearchQuality);
        }
        if options.include_fast {
            datasets.push(UhslcDataset::FastDelivery);
        }

        let mut parts = vec![];
        for dataset in datasets {
            if let Some(series) = self
                .fetch_dataset(dataset, &station.station_id, time_min, time_max)
                .await?
            {
                parts.push(series);
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        // research quality first, so it wins on overlapping timestamps
        Ok(Some(Timeseries::merge_prefer_first(parts)))
    }
}
