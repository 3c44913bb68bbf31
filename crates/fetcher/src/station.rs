use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use geo::Point;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{timeutil::days_between, SshError};

/// Sea-level data archives with a catalog reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Source {
    Ssc,
    Gesla3,
    Ioc,
    Cmems,
    CmemsNrt,
    Uhslc,
    PsmslGnssir,
    Rwsddl,
    Gtsm3Era5Cds,
}

impl Source {
    pub const ALL: [Source; 9] = [
        Source::Ssc,
        Source::Gesla3,
        Source::Ioc,
        Source::Cmems,
        Source::CmemsNrt,
        Source::Uhslc,
        Source::PsmslGnssir,
        Source::Rwsddl,
        Source::Gtsm3Era5Cds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ssc => "ssc",
            Source::Gesla3 => "gesla3",
            Source::Ioc => "ioc",
            Source::Cmems => "cmems",
            Source::CmemsNrt => "cmems-nrt",
            Source::Uhslc => "uhslc",
            Source::PsmslGnssir => "psmsl-gnssir",
            Source::Rwsddl => "rwsddl",
            Source::Gtsm3Era5Cds => "gtsm3-era5-cds",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Source::ALL.iter().map(Source::as_str).collect()
    }

    /// The SSC list only links identifiers, it has no time series of its own
    pub fn supports_retrieval(&self) -> bool {
        !matches!(self, Source::Ssc)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .iter()
            .find(|source| source.as_str() == s)
            .copied()
            .ok_or_else(|| SshError::InvalidSource {
                valid: Source::names(),
                received: s.to_string(),
            })
    }
}

/// Identifier groups listed per station in the SSC catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SscGroup {
    Psmsl,
    Ioc,
    Ptwc,
    Gloss,
    Uhslc,
    SonelGps,
    SonelTg,
}

impl SscGroup {
    pub const ALL: [SscGroup; 7] = [
        SscGroup::Psmsl,
        SscGroup::Ioc,
        SscGroup::Ptwc,
        SscGroup::Gloss,
        SscGroup::Uhslc,
        SscGroup::SonelGps,
        SscGroup::SonelTg,
    ];

    /// Groups usable for lookups and subsetting
    pub const SELECTABLE: [SscGroup; 5] = [
        SscGroup::Psmsl,
        SscGroup::Ioc,
        SscGroup::Ptwc,
        SscGroup::Gloss,
        SscGroup::Uhslc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SscGroup::Psmsl => "psmsl",
            SscGroup::Ioc => "ioc",
            SscGroup::Ptwc => "ptwc",
            SscGroup::Gloss => "gloss",
            SscGroup::Uhslc => "uhslc",
            SscGroup::SonelGps => "sonel_gps",
            SscGroup::SonelTg => "sonel_tg",
        }
    }
}

impl fmt::Display for SscGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SscGroup {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SscGroup::SELECTABLE
            .iter()
            .find(|group| group.as_str() == s)
            .copied()
            .ok_or_else(|| SshError::InvalidGroup {
                valid: SscGroup::SELECTABLE.iter().map(SscGroup::as_str).collect(),
                received: s.to_string(),
            })
    }
}

/// A station of another provider that an SSC entry links to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedStation {
    pub x: f64,
    pub y: f64,
    pub dist: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkedDistances {
    /// keyed like `UHSLC: 57` or `IOC: abas`
    pub stations: BTreeMap<String, LinkedStation>,
    pub dist_min: f64,
    pub dist_max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StationDetails {
    None,
    Ssc {
        ids: BTreeMap<SscGroup, Vec<String>>,
        linked: Option<LinkedDistances>,
    },
    Ioc {
        numeric_code: String,
        location: String,
        utc_offset: f64,
    },
    Cmems {
        file_name: String,
    },
    Gesla3 {
        gauge_type: String,
        null_value: Option<f64>,
    },
    PsmslGnssir {
        code: String,
    },
    Rwsddl {
        x: f64,
        y: f64,
        epsg: u32,
        metadata: BTreeMap<String, String>,
    },
}

impl StationDetails {
    pub fn ssc_ids(&self, group: SscGroup) -> &[String] {
        match self {
            StationDetails::Ssc { ids, .. } => ids.get(&group).map(Vec::as_slice).unwrap_or(&[]),
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub source: Source,
    pub station_id: String,
    pub station_name: String,
    pub station_name_unique: String,
    pub country: String,
    /// WGS84, x = longitude, y = latitude
    pub location: Point<f64>,
    pub time_min: Option<OffsetDateTime>,
    pub time_max: Option<OffsetDateTime>,
    pub details: StationDetails,
}

impl Station {
    pub fn longitude(&self) -> f64 {
        self.location.x()
    }

    pub fn latitude(&self) -> f64 {
        self.location.y()
    }

    pub fn time_ndays(&self) -> Option<f64> {
        match (self.time_min, self.time_max) {
            (Some(min), Some(max)) => Some(days_between(min, max)),
            _ => None,
        }
    }
}

/// Integer ids sort numerically, anything else lexically
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub stations: Vec<Station>,
}

impl Catalog {
    pub fn new(stations: Vec<Station>) -> Self {
        Catalog { stations }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Station> {
        self.stations.iter()
    }

    pub fn get(&self, station_id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.station_id == station_id)
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.stations.iter().map(|s| s.source).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// The one source all stations belong to
    pub fn single_source(&self) -> Result<Source, SshError> {
        match self.sources().as_slice() {
            [] => Err(SshError::EmptyCatalog),
            [source] => Ok(*source),
            many => Err(SshError::MixedSources(many.to_vec())),
        }
    }

    pub fn sort_by_station_id(&mut self) {
        self.stations
            .sort_by(|a, b| compare_ids(&a.station_id, &b.station_id));
    }

    pub fn retain(&mut self, keep: impl FnMut(&Station) -> bool) {
        self.stations.retain(keep);
    }
}

impl IntoIterator for Catalog {
    type Item = Station;
    type IntoIter = std::vec::IntoIter<Station>;

    fn into_iter(self) -> Self::IntoIter {
        self.stations.into_iter()
    }
}

impl FromIterator<Station> for Catalog {
    fn from_iter<T: IntoIterator<Item = Station>>(iter: T) -> Self {
        Catalog::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) fn test_station(source: Source, id: &str, lon: f64, lat: f64) -> Station {
    Station {
        source,
        station_id: id.to_string(),
        station_name: id.to_string(),
        station_name_unique: format!("{}-{}", source, id),
        country: String::new(),
        location: Point::new(lon, lat),
        time_min: None,
        time_max: None,
        details: StationDetails::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn source_names_round_trip() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
    }

    #[test]
    fn invalid_source_lists_valid_names() {
        let err = "bodc".parse::<Source>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'bodc'"));
        assert!(message.contains("gtsm3-era5-cds"));
    }

    #[test]
    fn only_selectable_groups_parse() {
        assert_eq!("uhslc".parse::<SscGroup>().unwrap(), SscGroup::Uhslc);
        assert!("sonel_tg".parse::<SscGroup>().is_err());
    }

    #[test]
    fn time_ndays_needs_both_bounds() {
        let mut station = test_station(Source::Ioc, "abas", 144.3, 44.0);
        assert_eq!(station.time_ndays(), None);
        station.time_min = Some(datetime!(2020-01-01 0:00 UTC));
        station.time_max = Some(datetime!(2020-01-11 0:00 UTC));
        assert_eq!(station.time_ndays(), Some(10.0));
    }

    #[test]
    fn sorts_numeric_ids_numerically() {
        let mut catalog: Catalog = ["10", "9", "100"]
            .iter()
            .map(|id| test_station(Source::Uhslc, id, 0.0, 0.0))
            .collect();
        catalog.sort_by_station_id();
        let ids: Vec<&str> = catalog.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10", "100"]);
    }

    #[test]
    fn single_source_rejects_mixed_and_empty() {
        assert!(matches!(
            Catalog::default().single_source(),
            Err(SshError::EmptyCatalog)
        ));
        let catalog = Catalog::new(vec![
            test_station(Source::Ioc, "a", 0.0, 0.0),
            test_station(Source::Uhslc, "1", 0.0, 0.0),
        ]);
        assert!(matches!(
            catalog.single_source(),
            Err(SshError::MixedSources(_))
        ));
    }
}
