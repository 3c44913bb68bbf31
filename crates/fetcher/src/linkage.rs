//! Record linkage between provider catalogs through the SSC identifier lists
//! and by geographic proximity.

use std::collections::BTreeMap;

use geo::{HaversineDistance, Point};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;
use slog::{debug, warn, Logger};

use crate::{Catalog, LinkedDistances, LinkedStation, Result, SscGroup, SshError, Station, StationDetails};

/// Parse group names, every one must be selectable
pub fn check_ssc_groups<S: AsRef<str>>(groups: &[S]) -> Result<Vec<SscGroup>> {
    groups.iter().map(|g| g.as_ref().parse::<SscGroup>()).collect()
}

/// The `ssc_id` of the single SSC station listing `group_id` in `group`
pub fn ssc_id_from_other_id(ssc: &Catalog, group_id: &str, group: SscGroup) -> Result<String> {
    let matches: Vec<&Station> = ssc
        .iter()
        .filter(|s| s.details.ssc_ids(group).iter().any(|id| id == group_id))
        .collect();

    match matches.as_slice() {
        [] => Err(SshError::SscIdNotFound {
            id: group_id.to_string(),
            group: group.to_string(),
        }),
        [single] => Ok(single.station_id.clone()),
        many => Err(SshError::SscIdAmbiguous {
            id: group_id.to_string(),
            group: group.to_string(),
            matches: many
                .iter()
                .map(|s| {
                    format!(
                        "{} {} {} {} {} {:?}",
                        s.station_id,
                        s.station_name,
                        s.country,
                        s.latitude(),
                        s.longitude(),
                        s.details.ssc_ids(group)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }),
    }
}

/// Keep SSC stations with at least one identifier in any of `groups`
pub fn subset_groups(mut ssc: Catalog, groups: &[SscGroup]) -> Catalog {
    ssc.retain(|s| groups.iter().any(|g| !s.details.ssc_ids(*g).is_empty()));
    ssc
}

fn planar_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    ((b.x() - a.x()).powi(2) + (b.y() - a.y()).powi(2)).sqrt()
}

/// Case-insensitive IOC lookup; repeated code/position pairs collapse to one entry
fn ioc_index(ioc: &Catalog) -> BTreeMap<String, Point<f64>> {
    let mut index = BTreeMap::new();
    for station in ioc.iter() {
        index
            .entry(station.station_id.to_lowercase())
            .or_insert(station.location);
    }
    index
}

/// Attach positions of and distances (degrees) to the UHSLC and IOC stations
/// each SSC station links to. Ids missing from the linked catalogs are
/// logged and skipped.
pub fn add_linked_stations(ssc: &mut Catalog, uhslc: &Catalog, ioc: &Catalog, logger: &Logger) {
    let uhslc_index: BTreeMap<&str, Point<f64>> =
        uhslc.iter().map(|s| (s.station_id.as_str(), s.location)).collect();
    let ioc_index = ioc_index(ioc);

    for station in ssc.stations.iter_mut() {
        let mut linked = BTreeMap::new();
        let groups = [(SscGroup::Ioc, "IOC"), (SscGroup::Uhslc, "UHSLC")];
        for (group, label) in groups {
            for linked_id in station.details.ssc_ids(group) {
                let linked_id = linked_id.to_lowercase();
                let position = match group {
                    SscGroup::Uhslc => uhslc_index.get(linked_id.as_str()).copied(),
                    _ => ioc_index.get(&linked_id).copied(),
                };
                let Some(position) = position else {
                    warn!(
                        logger,
                        "{} links to {} id '{}' which is not in that catalog",
                        station.station_id,
                        label,
                        linked_id
                    );
                    continue;
                };
                linked.insert(
                    format!("{}: {}", label, linked_id),
                    LinkedStation {
                        x: position.x(),
                        y: position.y(),
                        dist: planar_distance(station.location, position),
                    },
                );
            }
        }

        if linked.is_empty() {
            continue;
        }
        let dist_min = linked.values().map(|l| l.dist).fold(f64::INFINITY, f64::min);
        let dist_max = linked.values().map(|l| l.dist).fold(f64::NEG_INFINITY, f64::max);
        if let StationDetails::Ssc { linked: slot, .. } = &mut station.details {
            *slot = Some(LinkedDistances {
                stations: linked,
                dist_min,
                dist_max,
            });
        }
    }
    debug!(logger, "added linked stations to {} ssc stations", ssc.len());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IocMembership {
    pub ioc_code: String,
    pub in_ssc: bool,
    pub in_uhslc: bool,
}

/// Per IOC code: listed in SSC at all, and whether the first SSC entry
/// listing it also carries a UHSLC id
pub fn ioc_stations_in_uhslc<S: AsRef<str>>(ioc_codes: &[S], ssc: &Catalog) -> Vec<IocMembership> {
    ioc_codes
        .iter()
        .map(|code| {
            let code = code.as_ref();
            let first = ssc
                .iter()
                .find(|s| s.details.ssc_ids(SscGroup::Ioc).iter().any(|id| id == code));
            IocMembership {
                ioc_code: code.to_string(),
                in_ssc: first.is_some(),
                in_uhslc: first.is_some_and(|s| !s.details.ssc_ids(SscGroup::Uhslc).is_empty()),
            }
        })
        .collect()
}

/// Whether UHSLC already serves an IOC station
pub fn ioc_served_by_uhslc(ioc_code: &str, ssc: &Catalog) -> bool {
    ioc_stations_in_uhslc(&[ioc_code], ssc)
        .first()
        .is_some_and(|m| m.in_uhslc)
}

struct IndexedStation {
    position: [f64; 2],
    index: usize,
}

impl RTreeObject for IndexedStation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedStation {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationMatch {
    pub from_source: String,
    pub from_station_id: String,
    pub from_station_name_unique: String,
    pub to_source: String,
    pub to_station_id: String,
    pub to_station_name_unique: String,
    pub distance_deg: f64,
    pub distance_m: f64,
}

/// Nearest station of `to` for every station of `from`, optionally dropping
/// pairs further apart than `max_distance_m`
pub fn nearest_matches(from: &Catalog, to: &Catalog, max_distance_m: Option<f64>) -> Vec<StationMatch> {
    let tree = RTree::bulk_load(
        to.iter()
            .enumerate()
            .map(|(index, s)| IndexedStation {
                position: [s.longitude(), s.latitude()],
                index,
            })
            .collect(),
    );

    from.iter()
        .filter_map(|station| {
            let nearest = tree.nearest_neighbor(&[station.longitude(), station.latitude()])?;
            let other = &to.stations[nearest.index];
            let distance_m = station.location.haversine_distance(&other.location);
            if max_distance_m.is_some_and(|max| distance_m > max) {
                return None;
            }
            Some(StationMatch {
                from_source: station.source.to_string(),
                from_station_id: station.station_id.clone(),
                from_station_name_unique: station.station_name_unique.clone(),
                to_source: other.source.to_string(),
                to_station_id: other.station_id.clone(),
                to_station_name_unique: other.station_name_unique.clone(),
                distance_deg: planar_distance(station.location, other.location),
                distance_m,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{station::test_station, Source};
    use slog::{o, Discard};

    fn ssc_station(id: &str, lon: f64, lat: f64, ids: &[(SscGroup, &[&str])]) -> Station {
        let mut station = test_station(Source::Ssc, id, lon, lat);
        station.details = StationDetails::Ssc {
            ids: ids
                .iter()
                .map(|(g, v)| (*g, v.iter().map(|s| s.to_string()).collect()))
                .collect(),
            linked: None,
        };
        station
    }

    fn ssc_catalog() -> Catalog {
        Catalog::new(vec![
            ssc_station("SSC-abas", 144.28, 44.02, &[(SscGroup::Ioc, &["abas"]), (SscGroup::Uhslc, &["347"])]),
            ssc_station("SSC-dzao", 45.26, -12.78, &[(SscGroup::Ioc, &["dzao"])]),
            ssc_station("SSC-dup1", 0.0, 0.0, &[(SscGroup::Gloss, &["9"])]),
            ssc_station("SSC-dup2", 1.0, 1.0, &[(SscGroup::Gloss, &["9"])]),
        ])
    }

    #[test]
    fn finds_ssc_id_by_group_id() {
        let ssc = ssc_catalog();
        assert_eq!(ssc_id_from_other_id(&ssc, "347", SscGroup::Uhslc).unwrap(), "SSC-abas");
        assert!(matches!(
            ssc_id_from_other_id(&ssc, "1", SscGroup::Uhslc),
            Err(SshError::SscIdNotFound { .. })
        ));
        let err = ssc_id_from_other_id(&ssc, "9", SscGroup::Gloss).unwrap_err();
        assert!(matches!(err, SshError::SscIdAmbiguous { .. }));
        assert!(err.to_string().contains("SSC-dup2"));
    }

    #[test]
    fn subsets_on_any_group() {
        let groups = check_ssc_groups(&["uhslc", "gloss"]).unwrap();
        let subset = subset_groups(ssc_catalog(), &groups);
        let ids: Vec<_> = subset.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["SSC-abas", "SSC-dup1", "SSC-dup2"]);
        assert!(check_ssc_groups(&["sonel_gps"]).is_err());
    }

    #[test]
    fn links_stations_case_insensitive() {
        let mut ssc = ssc_catalog();
        let uhslc = Catalog::new(vec![test_station(Source::Uhslc, "347", 144.29, 44.02)]);
        let ioc = Catalog::new(vec![
            test_station(Source::Ioc, "ABAS", 144.28, 44.0),
            test_station(Source::Ioc, "abas", 150.0, 40.0),
        ]);
        add_linked_stations(&mut ssc, &uhslc, &ioc, &Logger::root(Discard, o!()));

        let StationDetails::Ssc { linked: Some(linked), .. } = &ssc.stations[0].details else {
            panic!("expected linked stations");
        };
        assert_eq!(linked.stations.len(), 2);
        assert!((linked.stations["IOC: abas"].dist - 0.02).abs() < 1e-9);
        assert!((linked.dist_max - 0.02).abs() < 1e-9);
        assert!((linked.dist_min - 0.01).abs() < 1e-9);

        // dzao is missing from the IOC catalog
        assert!(matches!(
            &ssc.stations[1].details,
            StationDetails::Ssc { linked: None, .. }
        ));
    }

    #[test]
    fn ioc_membership_needs_uhslc_id() {
        let ssc = ssc_catalog();
        assert!(ioc_served_by_uhslc("abas", &ssc));
        assert!(!ioc_served_by_uhslc("dzao", &ssc));

        let membership = ioc_stations_in_uhslc(&["dzao", "nope"], &ssc);
        assert!(membership[0].in_ssc && !membership[0].in_uhslc);
        assert!(!membership[1].in_ssc);
    }

    #[test]
    fn nearest_with_distance_cap() {
        let from = Catalog::new(vec![
            test_station(Source::Gesla3, "a", 4.12, 51.98),
            test_station(Source::Gesla3, "b", -70.0, 10.0),
        ]);
        let to = Catalog::new(vec![
            test_station(Source::Ioc, "hvh", 4.1201, 51.9801),
            test_station(Source::Ioc, "far", 100.0, 0.0),
        ]);
        let all = nearest_matches(&from, &to, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].to_station_id, "hvh");
        assert!(all[0].distance_m < 20.0);

        let capped = nearest_matches(&from, &to, Some(1000.0));
        assert_eq!(capped.len(), 1);
        assert!(nearest_matches(&from, &Catalog::default(), None).is_empty());
    }
}
