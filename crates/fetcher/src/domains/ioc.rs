//! IOC sea level monitoring facility: station list and monthly JSON data
//! requests, see https://www.ioc-sealevelmonitoring.org/service.php?query=help

use async_trait::async_trait;
use geo::Point;
use serde::Deserialize;
use slog::{debug, info, Logger};
use time::OffsetDateTime;

use super::{de_f64, de_opt_f64, de_string, require_window, ssc::SscProvider, CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    linkage::ioc_served_by_uhslc,
    names::ioc_unique_name,
    timeutil::{format_naive, month_periods, parse_utc},
    Catalog, HttpRequest, Keep, LengthUnit, Result, Source, SshError, Station, StationDetails, Timeseries,
};

pub const SERVICE_URL: &str = "https://www.ioc-sealevelmonitoring.org/service.php";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowAll {
    /// active stations only
    Active,
    /// every known station, including ones that never reported
    All,
}

impl ShowAll {
    fn as_query(&self) -> &'static str {
        match self {
            ShowAll::Active => "a",
            ShowAll::All => "all",
        }
    }
}

pub fn station_list_url(showall: ShowAll) -> String {
    format!("{}?query=stationlist&showall={}", SERVICE_URL, showall.as_query())
}

pub fn data_url(code: &str, start: OffsetDateTime, stop: OffsetDateTime) -> Result<String> {
    Ok(format!(
        "{}?query=data&code={}&format=json&timestart={}&timestop={}",
        SERVICE_URL,
        code,
        format_naive(start)?,
        format_naive(stop)?
    ))
}

#[derive(Debug, Deserialize)]
struct IocRecord {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "code", default, deserialize_with = "de_string")]
    numeric_code: String,
    #[serde(rename = "Location", default)]
    location: String,
    #[serde(default, deserialize_with = "de_string")]
    country: String,
    #[serde(deserialize_with = "de_f64")]
    lat: f64,
    #[serde(deserialize_with = "de_f64")]
    lon: f64,
    #[serde(rename = "UTCOffset", default, deserialize_with = "de_opt_f64")]
    utc_offset: Option<f64>,
    #[serde(default)]
    date_created: Option<String>,
    #[serde(default)]
    lasttime: Option<String>,
}

fn optional_time(value: Option<&str>, logger: &Logger) -> Option<OffsetDateTime> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    match parse_utc(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(logger, "ignoring unparsable time: {}", e);
            None
        }
    }
}

impl IocRecord {
    fn into_station(self, logger: &Logger) -> Station {
        Station {
            source: Source::Ioc,
            station_name_unique: ioc_unique_name(&self.code, &self.numeric_code),
            station_name: self.code.clone(),
            station_id: self.code,
            country: self.country,
            location: Point::new(self.lon, self.lat),
            time_min: optional_time(self.date_created.as_deref(), logger),
            time_max: optional_time(self.lasttime.as_deref(), logger),
            details: StationDetails::Ioc {
                numeric_code: self.numeric_code,
                location: self.location,
                utc_offset: self.utc_offset.unwrap_or(0.0),
            },
        }
    }
}

pub fn parse_station_list(body: &[u8], logger: &Logger) -> Result<Catalog> {
    let records: Vec<IocRecord> =
        serde_json::from_slice(body).map_err(|e| SshError::parse("IOC station list", e))?;
    Ok(records.into_iter().map(|r| r.into_station(logger)).collect())
}

#[derive(Debug, Deserialize)]
struct IocSample {
    #[serde(default, deserialize_with = "de_opt_f64")]
    slevel: Option<f64>,
    stime: String,
}

/// One monthly data response. `None` for an empty month; a service-side
/// error message becomes an error.
pub fn parse_data(body: &[u8]) -> Result<Option<Timeseries>> {
    let text = String::from_utf8_lossy(body);
    if text.trim() == "[]" {
        return Ok(None);
    }
    let values: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| SshError::parse("IOC data", e))?;
    if values.first().is_some_and(|v| v.get("error").is_some()) {
        return Err(SshError::Provider(text.into_owned()));
    }

    let mut series = Timeseries::new(LengthUnit::Meters);
    for value in values {
        let sample: IocSample = serde_json::from_value(value).map_err(|e| SshError::parse("IOC data", e))?;
        series.push(parse_utc(&sample.stime)?, sample.slevel);
    }
    Ok(Some(series))
}

pub struct IocProvider {
    ctx: ProviderContext,
}

impl IocProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        IocProvider { ctx }
    }

    pub async fn fetch_catalog(&self, showall: ShowAll) -> Result<Catalog> {
        let url = station_list_url(showall);
        let response = self.ctx.http.send(HttpRequest::get(&url)).await?;
        if response.is_not_found() {
            return Err(SshError::Provider(format!("url 404: {}", response.text())));
        }
        let response = response.error_for_status(&url)?;
        parse_station_list(&response.body, &self.ctx.logger)
    }
}

#[async_trait]
impl SshProvider for IocProvider {
    fn source(&self) -> Source {
        Source::Ioc
    }

    async fn read_catalog(&self, options: &CatalogOptions) -> Result<Catalog> {
        let mut catalog = self.fetch_catalog(ShowAll::Active).await?;

        if options.drop_uhslc {
            let ssc = SscProvider::new(self.ctx.clone()).fetch_catalog().await?;
            catalog.retain(|s| !ioc_served_by_uhslc(&s.station_id, &ssc));
        }
        if options.drop_dart {
            catalog.retain(|s| !matches!(&s.details, StationDetails::Ioc { location, .. } if location.starts_with("DART ")));
        }
        if options.drop_nonutc {
            catalog.retain(|s| matches!(&s.details, StationDetails::Ioc { utc_offset, .. } if *utc_offset == 0.0));
        }
        info!(self.ctx.logger, "read {} ioc stations", catalog.len());
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        let (time_min, time_max) = require_window(Source::Ioc, time_min, time_max)?;

        let mut months = vec![];
        for (start, stop) in month_periods(time_min, time_max) {
            let url = data_url(&station.station_id, start, stop)?;
            let response = self.ctx.http.send(HttpRequest::get(&url)).await?;
            if response.is_not_found() {
                return Err(SshError::Provider(format!("url 404: {}", response.text())));
            }
            let response = response.error_for_status(&url)?;
            match parse_data(&response.body)? {
                Some(month) => months.push(month),
                None => debug!(self.ctx.logger, "no ioc data for {} from {}", station.station_id, start),
            }
        }
        if months.is_empty() {
            return Ok(None);
        }

        let mut series = Timeseries::new(LengthUnit::Meters);
        for month in months {
            series.samples.extend(month.samples);
        }
        series.drop_duplicate_times(Keep::Last);
        series.sort_by_time();
        if options.subset_hourly {
            series.samples.retain(|s| s.time.minute() == 0);
        }
        series.slice_time(Some(time_min), Some(time_max));
        Ok(Some(series))
    }
}
