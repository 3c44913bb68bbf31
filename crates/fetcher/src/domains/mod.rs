//! Per-provider adapters behind one catalog/retrieval contract.

pub mod cds;
pub mod cmems;
pub mod gesla3;
pub mod gtsm3_era5;
pub mod ioc;
pub mod nc;
pub mod psmsl_gnssir;
pub mod rwsddl;
pub mod ssc;
pub mod uhslc;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use slog::Logger;
use time::OffsetDateTime;

use crate::{Catalog, HttpSource, Result, Source, Station, Timeseries};

/// Provider locations and credentials that are not part of a single request
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Index files and reanalysis archives are cached below this directory
    pub cache_dir: PathBuf,
    /// Directory holding `GESLA3_ALL 2.csv` and `GESLA3.0_ALL.zip`
    pub gesla3_dir: Option<PathBuf>,
    pub cmems_my_url: String,
    pub cmems_nrt_url: String,
    pub rws_url: String,
    pub cds_url: Option<String>,
    pub cds_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            cache_dir: sealevel_core::get_xdg_cache_dir(),
            gesla3_dir: None,
            cmems_my_url: cmems::DEFAULT_MY_URL.to_string(),
            cmems_nrt_url: cmems::DEFAULT_NRT_URL.to_string(),
            rws_url: rwsddl::DEFAULT_URL.to_string(),
            cds_url: None,
            cds_key: None,
        }
    }
}

#[derive(Clone)]
pub struct ProviderContext {
    pub logger: Logger,
    pub http: Arc<dyn HttpSource>,
    pub settings: ProviderSettings,
}

impl ProviderContext {
    pub fn new(logger: Logger, http: Arc<dyn HttpSource>, settings: ProviderSettings) -> Self {
        ProviderContext {
            logger,
            http,
            settings,
        }
    }
}

/// Knobs of the individual catalog readers; each reader ignores the others
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogOptions {
    /// ssc: add positions of and distances to linked UHSLC/IOC stations
    pub linked_stations: bool,
    /// ioc: drop stations that UHSLC already serves
    pub drop_uhslc: bool,
    /// ioc: drop DART buoys
    pub drop_dart: bool,
    /// ioc: drop stations not reporting in UTC
    pub drop_nonutc: bool,
    /// gesla3: keep coastal gauges only
    pub only_coastal: bool,
    /// cmems: download the index again even when cached
    pub overwrite_index: bool,
    /// rwsddl: metadata filter, e.g. `Grootheid.Code = WATHTE`
    pub rws_filter: BTreeMap<String, String>,
    /// rwsddl: look up the latest measurement of every station
    pub rws_time_max: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        CatalogOptions {
            linked_stations: false,
            drop_uhslc: true,
            drop_dart: true,
            drop_nonutc: true,
            only_coastal: true,
            overwrite_index: true,
            rws_filter: rwsddl::default_filter(),
            rws_time_max: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveOptions {
    /// ioc: keep full hours only
    pub subset_hourly: bool,
    /// uhslc: research quality dataset
    pub include_rqds: bool,
    /// uhslc: fast delivery dataset
    pub include_fast: bool,
    /// gtsm3-era5-cds: `10_min` or `hourly`
    pub time_freq: String,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        RetrieveOptions {
            subset_hourly: false,
            include_rqds: true,
            include_fast: true,
            time_freq: "10_min".to_string(),
        }
    }
}

#[async_trait]
pub trait SshProvider: Send + Sync {
    fn source(&self) -> Source;

    async fn read_catalog(&self, options: &CatalogOptions) -> Result<Catalog>;

    /// Add time extents the catalog service itself does not deliver
    async fn complete_time_extents(&self, catalog: Catalog) -> Result<Catalog> {
        Ok(catalog)
    }

    /// `Ok(None)` when the station has no data in the window
    async fn retrieve_data(
        &self,
        station: &Station,
        time_min: Option<OffsetDateTime>,
        time_max: Option<OffsetDateTime>,
        options: &RetrieveOptions,
    ) -> Result<Option<Timeseries>>;
}

pub fn provider_for(source: Source, ctx: &ProviderContext) -> Box<dyn SshProvider> {
    match source {
        Source::Ssc => Box::new(ssc::SscProvider::new(ctx.clone())),
        Source::Gesla3 => Box::new(gesla3::Gesla3Provider::new(ctx.clone())),
        Source::Ioc => Box::new(ioc::IocProvider::new(ctx.clone())),
        Source::Cmems | Source::CmemsNrt => Box::new(cmems::CmemsProvider::new(ctx.clone(), source)),
        Source::Uhslc => Box::new(uhslc::UhslcProvider::new(ctx.clone())),
        Source::PsmslGnssir => Box::new(psmsl_gnssir::PsmslGnssirProvider::new(ctx.clone())),
        Source::Rwsddl => Box::new(rwsddl::RwsDdlProvider::new(ctx.clone())),
        Source::Gtsm3Era5Cds => Box::new(gtsm3_era5::Gtsm3Era5Provider::new(ctx.clone())),
    }
}

/// Error unless both bounds of the retrieval window are given
pub(crate) fn require_window(
    source: Source,
    time_min: Option<OffsetDateTime>,
    time_max: Option<OffsetDateTime>,
) -> Result<(OffsetDateTime, OffsetDateTime)> {
    match (time_min, time_max) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(crate::SshError::InvalidArgument(format!(
            "cannot retrieve '{}' data without both time_min and time_max",
            source
        ))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Option<Scalar>>),
    One(Scalar),
}

/// Numbers sometimes arrive quoted
pub(crate) fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    de_opt_f64(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing number"))
}

pub(crate) fn de_opt_f64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Scalar::Number(n)) => Ok(n.as_f64()),
        Some(Scalar::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Scalar::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Scalar::Bool(_)) => Err(serde::de::Error::custom("expected a number")),
    }
}

/// Identifier cells: text or number, rendered as text
pub(crate) fn de_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?
        .map(Scalar::into_string)
        .unwrap_or_default())
}

/// Absent, null, scalar or list cells all become a list of strings
pub(crate) fn de_id_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => vec![],
        Some(OneOrMany::One(value)) => vec![value.into_string()],
        Some(OneOrMany::Many(values)) => values.into_iter().flatten().map(Scalar::into_string).collect(),
    })
}
