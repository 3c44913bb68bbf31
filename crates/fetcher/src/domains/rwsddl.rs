//! Rijkswaterstaat Data Distributielaag (DDL): measured waterlevels of the
//! Dutch national monitoring network.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use slog::{debug, info, warn, Logger};
use time::{macros::format_description, OffsetDateTime};

use super::{de_f64, de_opt_f64, de_string, require_window, CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    crs::{parse_epsg, single_epsg, to_wgs84},
    timeutil::{month_periods, parse_utc},
    Catalog, HttpRequest, HttpResponse, Keep, LengthUnit, Result, Source, SshError, Station, StationDetails,
    Timeseries,
};

pub const DEFAULT_URL: &str = "https://waterwebservices.rijkswaterstaat.nl";
const CATALOG_PATH: &str = "METADATASERVICES_DBO/OphalenCatalogus";
const OBSERVATIONS_PATH: &str = "ONLINEWAARNEMINGENSERVICES_DBO/OphalenWaarnemingen";
const LATEST_PATH: &str = "ONLINEWAARNEMINGENSERVICES_DBO/OphalenLaatsteWaarnemingen";

const NO_DATA_MESSAGE: &str = "Geen gegevens gevonden";
const QUALITY_REJECTED: &str = "99";
const MISSING_VALUE: f64 = 999_999_999.0;

/// Measured waterlevels
pub fn default_filter() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Grootheid.Code".to_string(), "WATHTE".to_string()),
        ("Groepering.Code".to_string(), "NVT".to_string()),
    ])
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(rename = "AquoMetadataLijst", default)]
    metadata: Vec<Map<String, Value>>,
    #[serde(rename = "LocatieLijst", default)]
    locations: Vec<RwsLocation>,
    #[serde(rename = "AquoMetadataLocatieLijst", default)]
    links: Vec<MetadataLink>,
}

#[derive(Debug, Clone, Deserialize)]
struct RwsLocation {
    #[serde(rename = "Locatie_MessageID")]
    message_id: i64,
    #[serde(rename = "Coordinatenstelsel", deserialize_with = "de_string")]
    epsg: String,
    #[serde(rename = "X", deserialize_with = "de_f64")]
    x: f64,
    #[serde(rename = "Y", deserialize_with = "de_f64")]
    y: f64,
    #[serde(rename = "Naam", default)]
    name: String,
    #[serde(rename = "Code")]
    code: String,
}

#[derive(Debug, Deserialize)]
struct MetadataLink {
    #[serde(rename = "AquoMetaData_MessageID")]
    metadata_id: i64,
    #[serde(rename = "Locatie_MessageID")]
    location_id: i64,
}

/// `{"Grootheid": {"Code": "WATHTE", ...}}` becomes `Grootheid.Code = WATHTE`
fn flatten_codes(metadata: &Map<String, Value>) -> BTreeMap<String, String> {
    metadata
        .iter()
        .filter_map(|(key, value)| {
            let code = value.get("Code")?.as_str()?;
            Some((format!("{}.Code", key), code.to_string()))
        })
        .collect()
}

fn nested_codes(codes: &BTreeMap<String, String>) -> Value {
    let mut aquo = Map::new();
    for (key, code) in codes {
        if let Some(name) = key.strip_suffix(".Code") {
            aquo.insert(name.to_string(), json!({ "Code": code }));
        }
    }
    Value::Object(aquo)
}

/// Locations joined with their metadata, filtered on `filter`. Each code is
/// kept once; coordinates are transformed to WGS84.
pub fn parse_catalog(body: &[u8], filter: &BTreeMap<String, String>, logger: &Logger) -> Result<Catalog> {
    let response: CatalogResponse =
        serde_json::from_slice(body).map_err(|e| SshError::parse("RWS catalog", e))?;

    let metadata: HashMap<i64, BTreeMap<String, String>> = response
        .metadata
        .iter()
        .filter_map(|m| Some((m.get("AquoMetadata_MessageID")?.as_i64()?, flatten_codes(m))))
        .collect();
    let locations: HashMap<i64, &RwsLocation> =
        response.locations.iter().map(|l| (l.message_id, l)).collect();

    let mut rows: Vec<(&RwsLocation, &BTreeMap<String, String>)> = response
        .links
        .iter()
        .filter_map(|link| Some((*locations.get(&link.location_id)?, metadata.get(&link.metadata_id)?)))
        .collect();

    for (key, value) in filter {
        if !rows.is_empty() && !rows.iter().any(|(_, codes)| codes.contains_key(key)) {
            let available: BTreeSet<&String> = rows.iter().flat_map(|(_, codes)| codes.keys()).collect();
            return Err(SshError::InvalidArgument(format!(
                "RWS locations cannot be subset for '{}', available are {:?}",
                key, available
            )));
        }
        rows.retain(|(_, codes)| codes.get(key) == Some(value));
    }

    let mut seen = BTreeSet::new();
    let before = rows.len();
    rows.retain(|(location, _)| seen.insert(location.code.clone()));
    if rows.len() < before {
        warn!(logger, "kept the first of {} repeated rws location codes", before - rows.len());
    }
    if rows.is_empty() {
        return Ok(Catalog::default());
    }

    let epsg = single_epsg(rows.iter().map(|(l, _)| l.epsg.as_str()))?;
    let mut stations = Vec::with_capacity(rows.len());
    for (location, codes) in rows {
        stations.push(Station {
            source: Source::Rwsddl,
            station_id: location.code.clone(),
            station_name: location.name.clone(),
            station_name_unique: location.code.clone(),
            country: "NLD".to_string(),
            location: to_wgs84(location.x, location.y, epsg)?,
            time_min: None,
            time_max: None,
            details: StationDetails::Rwsddl {
                x: location.x,
                y: location.y,
                epsg: parse_epsg(&location.epsg)?,
                metadata: codes.clone(),
            },
        });
    }
    Ok(Catalog::new(stations))
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(rename = "Succesvol", default)]
    success: bool,
    #[serde(rename = "Foutmelding", default)]
    message: Option<String>,
    #[serde(rename = "WaarnemingenLijst", default)]
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    #[serde(rename = "AquoMetadata", default)]
    metadata: Map<String, Value>,
    #[serde(rename = "MetingenLijst", default)]
    measurements: Vec<Measurement>,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    #[serde(rename = "Tijdstip")]
    time: String,
    #[serde(rename = "Meetwaarde", default)]
    value: Option<MeasuredValue>,
    #[serde(rename = "WaarnemingMetadata", default)]
    metadata: Option<MeasurementMetadata>,
}

#[derive(Debug, Deserialize)]
struct MeasuredValue {
    #[serde(rename = "Waarde_Numeriek", default, deserialize_with = "de_opt_f64")]
    numeric: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MeasurementMetadata {
    #[serde(rename = "KwaliteitswaardecodeLijst", default)]
    quality: Vec<String>,
}

/// Decoded observation response. `None` when the service reports no data.
fn parse_observations(response: &HttpResponse, url: &str) -> Result<Option<ObservationsResponse>> {
    if response.status == 204 {
        return Ok(None);
    }
    let parsed: ObservationsResponse = match response.json() {
        Ok(parsed) => parsed,
        Err(_) if !response.is_success() => {
            response.clone().error_for_status(url)?;
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    if !parsed.success {
        let message = parsed.message.unwrap_or_default();
        if message.contains(NO_DATA_MESSAGE) {
            return Ok(None);
        }
        return Err(SshError::Provider(format!("RWS DDL request failed: {}", message)));
    }
    Ok(Some(parsed))
}

/// Waterlevels in cm; quality code 99 and the 999999999 sentinel are masked
pub fn parse_measurements(response: &HttpResponse, url: &str) -> Result<Option<Timeseries>> {
    let Some(parsed) = parse_observations(response, url)? else {
        return Ok(None);
    };
    let mut series = Timeseries::new(LengthUnit::Centimeters);
    for observation in parsed.observations {
        let unit = flatten_codes(&observation.metadata)
            .remove("Eenheid.Code")
            .unwrap_or_default();
        if unit != "cm" {
            return Err(SshError::Provider(format!("unexpected unit '{}', expected cm", unit)));
        }
        for measurement in observation.measurements {
            let rejected = measurement
                .metadata
                .as_ref()
                .is_some_and(|m| m.quality.iter().any(|q| q == QUALITY_REJECTED));
            let value = measurement
                .value
                .and_then(|v| v.numeric)
                .filter(|v| *v < MISSING_VALUE && !rejected);
            series.push(parse_utc(&measurement.time)?, value);
        }
    }
    if series.is_empty() {
        return Ok(None);
    }
    Ok(Some(series))
}

pub fn parse_latest_time(response: &HttpResponse, url: &str) -> Result<Option<OffsetDateTime>> {
    let Some(parsed) = parse_observations(response, url)? else {
        return Ok(None);
    };
    let mut latest = None;
    for measurement in parsed.observations.iter().flat_map(|o| &o.measurements) {
        let time = parse_utc(&measurement.time)?;
        latest = latest.max(Some(time));
    }
    Ok(latest)
}

fn format_period_time(value: OffsetDateTime) -> Result<String> {
    let description =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]+00:00");
    Ok(value.to_offset(time::UtcOffset::UTC).format(description)?)
}

fn location_body(station: &Station) -> Result<(Value, &BTreeMap<String, String>)> {
    let StationDetails::Rwsddl { x, y, metadata, .. } = &station.details else {
        return Err(SshError::InvalidArgument(format!(
            "station '{}' carries no RWS location",
            station.station_id
        )));
    };
    Ok((json!({ "X": x, "Y": y, "Code": station.station_id }), metadata))
}

pub fn observations_request(
    base_url: &str,
    station: &Station,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<HttpRequest> {
    let (location, metadata) = location_body(station)?;
    let body = json!({
        "Locatie": location,
        "AquoPlusWaarnemingMetadata": { "AquoMetadata": nested_codes(metadata) },
        "Periode": {
            "Begindatumtijd": format_period_time(start)?,
            "Einddatumtijd": format_period_time(end)?,
        },
    });
    Ok(HttpRequest::post_json(format!("{}/{}", base_url, OBSERVATIONS_PATH), body))
}

pub fn latest_request(base_url: &str, station: &Station) -> Result<HttpRequest> {
    let (location, metadata) = location_body(station)?;
    let body = json!({
        "LocatieLijst": [location],
        "AquoPlusWaarnemingMetadataLijst": [{ "AquoMetadata": nested_codes(metadata) }],
    });
    Ok(HttpRequest::post_json(format!("{}/{}", base_url, LATEST_PATH), body))
}

pub struct RwsDdlProvider {
    ctx: ProviderContext,
}

impl RwsDdlProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        RwsDdlProvider { ctx }
    }

    fn base_url(&self) -> &str {
        self.ctx.settings.rws_url.trim_end_matches('/')
    }

    async fn add_time_max(&self, catalog: &mut Catalog) -> Result<()> {
        info!(self.ctx.logger, "getting time_max for {} rws locations", catalog.len());
        for station in catalog.stations.iter_mut() {
            let request = latest_request(self.base_url(), station)?;
            let url = request.url.clone();
            let response = self.ctx.http.send(request).await?;
            station.time_max = parse_latest_time(&response, &url)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SshProvider for RwsDdlProvider {
    fn source(&self) -> Source {
        Source::Rwsddl
    }

    async fn read_catalog(&self, options: &CatalogOptions) -> Result<Catalog> {
        let url = format!("{}/{}", self.base_url(), CATALOG_PATH);
        let body = json!({
            "CatalogusFilter": {
                "Compartimenten": true,
                "Grootheden": true,
                "Eenheden": true,
                "Groeperingen": true,
                "Hoedanigheden": true,
                "Parameters": true,
            }
        });
        let response = self
            .ctx
            .http
            .send(HttpRequest::post_json(&url, body))
            .await?
            .error_for_status(&url)?;
        let mut catalog = parse_catalog(&response.body, &options.rws_filter, &self.ctx.logger)?;
        if options.rws_time_max {
            self.add_time_max(&mut catalog).await?;
        }
        info!(self.ctx.logger, "read {} rwsddl stations", catalog.len());
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        _options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        let (time_min, time_max) = require_window(Source::Rwsddl, time_min, time_max)?;

        let mut series = Timeseries::new(LengthUnit::Centimeters);
        for (start, end) in month_periods(time_min, time_max) {
            let request = observations_request(self.base_url(), station, start.max(time_min), end.min(time_max))?;
            let url = request.url.clone();
            let response = self.ctx.http.send(request).await?;
            match parse_measurements(&response, &url)? {
                Some(month) => series.samples.extend(month.samples),
                None => debug!(self.ctx.logger, "no rws data for {} from {}", station.station_id, start),
            }
        }
        if series.is_empty() {
            return Ok(None);
        }

        series.drop_duplicate_times(Keep::First);
        series.sort_by_time();
        series.slice_time(Some(time_min), Some(time_max));
        if series.is_empty() {
            return Ok(None);
        }
        Ok(Some(series.into_meters()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{o, Discard};
    use time::macros::datetime;

    const CATALOG: &str = r#"{
        "Succesvol": true,
        "AquoMetadataLijst": [
            {"AquoMetadata_MessageID": 1, "Grootheid": {"Code": "WATHTE"}, "Groepering": {"Code": "NVT"},
             "Eenheid": {"Code": "cm"}, "Compartiment": {"Code": "OW"}, "Hoedanigheid": {"Code": "NAP"}},
            {"AquoMetadata_MessageID": 2, "Grootheid": {"Code": "T"}, "Groepering": {"Code": "NVT"},
             "Eenheid": {"Code": "oC"}, "Compartiment": {"Code": "OW"}},
            {"AquoMetadata_MessageID": 3, "Grootheid": {"Code": "WATHTE"}, "Groepering": {"Code": "NVT"},
             "Eenheid": {"Code": "cm"}, "Compartiment": {"Code": "OW"}, "Hoedanigheid": {"Code": "MSL"}}
        ],
        "LocatieLijst": [
            {"Locatie_MessageID": 10, "Coordinatenstelsel": "25831", "X": 576917.67, "Y": 5759136.15,
             "Naam": "Hoek van Holland", "Code": "HOEKVHLD"},
            {"Locatie_MessageID": 11, "Coordinatenstelsel": "25831", "X": 600000.0, "Y": 5800000.0,
             "Naam": "Elders", "Code": "ELDERS"}
        ],
        "AquoMetadataLocatieLijst": [
            {"AquoMetaData_MessageID": 1, "Locatie_MessageID": 10},
            {"AquoMetaData_MessageID": 3, "Locatie_MessageID": 10},
            {"AquoMetaData_MessageID": 2, "Locatie_MessageID": 11}
        ]
    }"#;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn joins_filters_and_transforms() {
        let catalog = parse_catalog(CATALOG.as_bytes(), &default_filter(), &logger()).unwrap();
        assert_eq!(catalog.len(), 1);
        let hvh = &catalog.stations[0];
        assert_eq!(hvh.station_id, "HOEKVHLD");
        assert_eq!(hvh.country, "NLD");
        assert!((hvh.longitude() - 4.12).abs() < 0.02);
        assert!((hvh.latitude() - 51.98).abs() < 0.02);
        let StationDetails::Rwsddl { metadata, epsg, .. } = &hvh.details else {
            panic!("expected rws details");
        };
        assert_eq!(*epsg, 25831);
        assert_eq!(metadata["Hoedanigheid.Code"], "NAP");
    }

    #[test]
    fn unknown_filter_key_lists_available() {
        let filter = BTreeMap::from([("Parameter.Code".to_string(), "x".to_string())]);
        let err = parse_catalog(CATALOG.as_bytes(), &filter, &logger()).unwrap_err();
        assert!(err.to_string().contains("Grootheid.Code"));
    }

    #[test]
    fn masks_rejected_values() {
        let body = r#"{"Succesvol": true, "WaarnemingenLijst": [{
            "AquoMetadata": {"Eenheid": {"Code": "cm"}},
            "MetingenLijst": [
                {"Tijdstip": "2020-01-01T01:00:00.000+01:00", "Meetwaarde": {"Waarde_Numeriek": 12.0},
                 "WaarnemingMetadata": {"KwaliteitswaardecodeLijst": ["00"]}},
                {"Tijdstip": "2020-01-01T01:10:00.000+01:00", "Meetwaarde": {"Waarde_Numeriek": 13.0},
                 "WaarnemingMetadata": {"KwaliteitswaardecodeLijst": ["99"]}},
                {"Tijdstip": "2020-01-01T01:20:00.000+01:00", "Meetwaarde": {"Waarde_Numeriek": 999999999.0},
                 "WaarnemingMetadata": {"KwaliteitswaardecodeLijst": ["00"]}}
            ]}]}"#;
        let series = parse_measurements(&HttpResponse::new(200, body), "u").unwrap().unwrap();
        assert_eq!(series.unit, LengthUnit::Centimeters);
        assert_eq!(series.samples[0].time, datetime!(2020-01-01 0:00 UTC));
        let values: Vec<_> = series.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![Some(12.0), None, None]);
    }

    #[test]
    fn no_data_is_not_an_error() {
        let body = r#"{"Succesvol": false, "Foutmelding": "Geen gegevens gevonden!"}"#;
        assert!(parse_measurements(&HttpResponse::new(200, body), "u").unwrap().is_none());
        assert!(parse_measurements(&HttpResponse::new(204, ""), "u").unwrap().is_none());
        let failed = r#"{"Succesvol": false, "Foutmelding": "Server te druk"}"#;
        assert!(parse_measurements(&HttpResponse::new(200, failed), "u").is_err());
    }

    #[test]
    fn other_units_are_rejected() {
        let body = r#"{"Succesvol": true, "WaarnemingenLijst": [{
            "AquoMetadata": {"Eenheid": {"Code": "m"}}, "MetingenLijst": []}]}"#;
        assert!(matches!(
            parse_measurements(&HttpResponse::new(200, body), "u"),
            Err(SshError::Provider(_))
        ));
    }

    #[test]
    fn request_periods_are_utc_with_millis() {
        let catalog = parse_catalog(CATALOG.as_bytes(), &default_filter(), &logger()).unwrap();
        let request = observations_request(
            DEFAULT_URL,
            &catalog.stations[0],
            datetime!(2020-01-01 0:00 UTC),
            datetime!(2020-02-01 0:00 UTC),
        )
        .unwrap();
        let body = request.json.unwrap();
        assert_eq!(body["Periode"]["Begindatumtijd"], "2020-01-01T00:00:00.000+00:00");
        assert_eq!(body["Locatie"]["Code"], "HOEKVHLD");
        assert_eq!(body["AquoPlusWaarnemingMetadata"]["AquoMetadata"]["Grootheid"]["Code"], "WATHTE");
    }
}
