//! Station Selection Catalog (SSC) of the IOC sea level monitoring facility.
//! It carries no data, only the identifiers other networks use per station.

use std::collections::BTreeMap;

use async_trait::async_trait;
use geo::Point;
use serde::Deserialize;
use slog::{info, Logger};
use time::OffsetDateTime;

use super::{de_f64, de_id_list, de_string, ioc, uhslc, CatalogOptions, ProviderContext, RetrieveOptions, SshProvider};
use crate::{
    linkage::add_linked_stations, names::{remove_accents, ssc_unique_name}, Catalog, HttpRequest, Result,
    Source, SscGroup, SshError, Station, StationDetails, Timeseries,
};

pub const SSC_URL: &str = "https://www.ioc-sealevelmonitoring.org/ssc/service.php?format=json";

#[derive(Debug, Deserialize)]
struct SscRecord {
    #[serde(deserialize_with = "de_string")]
    ssc_id: String,
    name: String,
    #[serde(default, deserialize_with = "de_string")]
    country: String,
    #[serde(rename = "geo:lat", deserialize_with = "de_f64")]
    lat: f64,
    #[serde(rename = "geo:lon", deserialize_with = "de_f64")]
    lon: f64,
    #[serde(default, deserialize_with = "de_id_list")]
    psmsl: Vec<String>,
    #[serde(default, deserialize_with = "de_id_list")]
    ioc: Vec<String>,
    #[serde(default, deserialize_with = "de_id_list")]
    ptwc: Vec<String>,
    #[serde(default, deserialize_with = "de_id_list")]
    gloss: Vec<String>,
    #[serde(default, deserialize_with = "de_id_list")]
    uhslc: Vec<String>,
    #[serde(default, deserialize_with = "de_id_list")]
    sonel_gps: Vec<String>,
    #[serde(default, deserialize_with = "de_id_list")]
    sonel_tg: Vec<String>,
}

impl SscRecord {
    fn into_station(self, logger: &Logger) -> Station {
        let ids: BTreeMap<SscGroup, Vec<String>> = [
            (SscGroup::Psmsl, self.psmsl),
            (SscGroup::Ioc, self.ioc),
            (SscGroup::Ptwc, self.ptwc),
            (SscGroup::Gloss, self.gloss),
            (SscGroup::Uhslc, self.uhslc),
            (SscGroup::SonelGps, self.sonel_gps),
            (SscGroup::SonelTg, self.sonel_tg),
        ]
        .into_iter()
        .collect();

        Station {
            source: Source::Ssc,
            station_name_unique: ssc_unique_name(&self.ssc_id, &self.name, logger),
            station_name: remove_accents(&self.name, logger),
            station_id: self.ssc_id,
            country: self.country,
            location: Point::new(self.lon, self.lat),
            time_min: None,
            time_max: None,
            details: StationDetails::Ssc { ids, linked: None },
        }
    }
}

/// Stations of an SSC JSON document, in document order
pub fn parse_catalog(body: &[u8], logger: &Logger) -> Result<Catalog> {
    let records: Vec<SscRecord> =
        serde_json::from_slice(body).map_err(|e| SshError::parse("SSC station list", e))?;
    Ok(records.into_iter().map(|r| r.into_station(logger)).collect())
}

pub struct SscProvider {
    ctx: ProviderContext,
}

impl SscProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        SscProvider { ctx }
    }

    pub async fn fetch_catalog(&self) -> Result<Catalog> {
        let response = self
            .ctx
            .http
            .send(HttpRequest::get(SSC_URL))
            .await?
            .error_for_status(SSC_URL)?;
        parse_catalog(&response.body, &self.ctx.logger)
    }
}

#[async_trait]
impl SshProvider for SscProvider {
    fn source(&self) -> Source {
        Source::Ssc
    }

    async fn read_catalog(&self, options: &CatalogOptions) -> Result<Catalog> {
        let mut catalog = self.fetch_catalog().await?;
        if options.linked_stations {
            let uhslc = uhslc::UhslcProvider::new(self.ctx.clone()).fetch_catalog().await?;
            let ioc = ioc::IocProvider::new(self.ctx.clone())
                .fetch_catalog(ioc::ShowAll::All)
                .await?;
            add_linked_stations(&mut catalog, &uhslc, &ioc, &self.ctx.logger);
        }
        info!(self.ctx.logger, "read {} ssc stations", catalog.len());
        Ok(catalog)
    }

    async fn retrieve_data(
        &self,
        _station: &Station,
        _time_min: Option<OffsetDateTime>,
        _time_max: Option<OffsetDateTime>,
        _options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>> {
        Err(SshError::RetrieveUnsupported(Source::Ssc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{o, Discard};

    #[test]
    fn parses_id_cells_of_every_shape() {
        let body = br#"[
            {"ssc_id": "SSC-abas", "name": "Abashiri", "country": "JP", "geo:lat": 44.02, "geo:lon": 144.28,
             "psmsl": null, "ioc": "abas", "uhslc": [347, "347b"], "gloss": null},
            {"ssc_id": "SSC-trom", "name": "Tromsø", "country": "NO", "geo:lat": "69.65", "geo:lon": "18.96"}
        ]"#;
        let catalog = parse_catalog(body, &Logger::root(Discard, o!())).unwrap();
        assert_eq!(catalog.len(), 2);

        let abas = &catalog.stations[0];
        assert_eq!(abas.station_name_unique, "SSC-abas_Abashiri");
        assert_eq!(abas.details.ssc_ids(SscGroup::Ioc), ["abas"]);
        assert_eq!(abas.details.ssc_ids(SscGroup::Uhslc), ["347", "347b"]);
        assert!(abas.details.ssc_ids(SscGroup::Psmsl).is_empty());

        let trom = &catalog.stations[1];
        assert_eq!(trom.station_name, "Tromso");
        assert_eq!(trom.latitude(), 69.65);
        assert!(trom.details.ssc_ids(SscGroup::Gloss).is_empty());
    }

    #[test]
    fn rejects_malformed_list() {
        assert!(parse_catalog(b"{\"error\": 1}", &Logger::root(Discard, o!())).is_err());
    }
}
