//! Coordinate harmonization onto WGS84 longitude/latitude.
//!
//! UTM grids are inverted with the Krüger n-series (accurate to well below a
//! millimetre inside a zone). Other projections need the `proj` feature.

use geo::Point;

use crate::{Result, SshError};

pub const EPSG_WGS84: u32 = 4326;
const EPSG_ETRS89: u32 = 4258;

const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ellipsoid {
    a: f64,
    f: f64,
}

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    f: 1.0 / 298.257_223_563,
};

const GRS80: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    f: 1.0 / 298.257_222_101,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmZone {
    zone: u8,
    north: bool,
    ellipsoid: Ellipsoid,
}

impl UtmZone {
    fn central_meridian(&self) -> f64 {
        (self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    fn false_northing(&self) -> f64 {
        if self.north {
            0.0
        } else {
            FALSE_NORTHING_SOUTH
        }
    }
}

/// Parse `EPSG:25831`, `epsg:4326`, `urn:ogc:def:crs:EPSG::25831` or a bare `25831`
pub fn parse_epsg(value: &str) -> Result<u32> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    let digits = if lower.starts_with("urn:ogc:def:crs:epsg:") {
        // the version field between the last two colons may be empty
        trimmed.rsplit(':').next().unwrap_or(trimmed)
    } else if lower.starts_with("epsg:") {
        &trimmed[5..]
    } else {
        trimmed
    };
    digits
        .parse::<u32>()
        .map_err(|_| SshError::Crs(format!("invalid EPSG code '{}'", value)))
}

fn utm_zone(epsg: u32) -> Option<UtmZone> {
    let (base, north, ellipsoid) = match epsg {
        32601..=32660 => (32600, true, WGS84),
        32701..=32760 => (32700, false, WGS84),
        25801..=25860 => (25800, true, GRS80),
        _ => return None,
    };
    Some(UtmZone {
        zone: (epsg - base) as u8,
        north,
        ellipsoid,
    })
}

/// Map a 0..360 longitude onto -180..180, rounded to 10 decimals so that
/// e.g. 134.463 does not come back as 134.46299999999997
pub fn lon_360_to_180(lon: f64) -> f64 {
    let shifted = (lon + 180.0).rem_euclid(360.0) - 180.0;
    (shifted * 1e10).round() / 1e10
}

/// Transform a point in `epsg` to a WGS84 longitude/latitude point
pub fn to_wgs84(x: f64, y: f64, epsg: u32) -> Result<Point<f64>> {
    if epsg == EPSG_WGS84 || epsg == EPSG_ETRS89 {
        return Ok(Point::new(x, y));
    }
    if let Some(zone) = utm_zone(epsg) {
        let (lon, lat) = utm_inverse(x, y, &zone);
        return Ok(Point::new(lon, lat));
    }
    proj_to_wgs84(x, y, epsg)
}

#[cfg(feature = "proj")]
fn proj_to_wgs84(x: f64, y: f64, epsg: u32) -> Result<Point<f64>> {
    let transform = proj::Proj::new_known_crs(&format!("EPSG:{}", epsg), "EPSG:4326", None)
        .map_err(|e| SshError::Crs(e.to_string()))?;
    let (lon, lat) = transform
        .convert((x, y))
        .map_err(|e| SshError::Crs(e.to_string()))?;
    Ok(Point::new(lon, lat))
}

#[cfg(not(feature = "proj"))]
fn proj_to_wgs84(_x: f64, _y: f64, epsg: u32) -> Result<Point<f64>> {
    Err(SshError::Crs(format!(
        "EPSG:{} is not a UTM grid, enable the 'proj' feature for general transforms",
        epsg
    )))
}

/// All codes in a location list must agree; returns that single code
pub fn single_epsg<'a>(codes: impl IntoIterator<Item = &'a str>) -> Result<u32> {
    let mut unique: Vec<&str> = vec![];
    for code in codes {
        if !unique.contains(&code) {
            unique.push(code);
        }
    }
    match unique.as_slice() {
        [single] => parse_epsg(single),
        [] => Err(SshError::Crs("no EPSG code in location list".to_string())),
        many => Err(SshError::Crs(format!(
            "multiple EPSG codes in one location list not supported: {:?}",
            many
        ))),
    }
}

fn third_flattening(e: &Ellipsoid) -> f64 {
    e.f / (2.0 - e.f)
}

fn rectifying_radius(e: &Ellipsoid, n: f64) -> f64 {
    e.a / (1.0 + n) * (1.0 + n.powi(2) / 4.0 + n.powi(4) / 64.0)
}

fn utm_inverse(easting: f64, northing: f64, zone: &UtmZone) -> (f64, f64) {
    let n = third_flattening(&zone.ellipsoid);
    let a_r = rectifying_radius(&zone.ellipsoid, n);

    let beta = [
        n / 2.0 - 2.0 * n.powi(2) / 3.0 + 37.0 * n.powi(3) / 96.0,
        n.powi(2) / 48.0 + n.powi(3) / 15.0,
        17.0 * n.powi(3) / 480.0,
    ];
    let delta = [
        2.0 * n - 2.0 * n.powi(2) / 3.0 - 2.0 * n.powi(3),
        7.0 * n.powi(2) / 3.0 - 8.0 * n.powi(3) / 5.0,
        56.0 * n.powi(3) / 15.0,
    ];

    let xi = (northing - zone.false_northing()) / (K0 * a_r);
    let eta = (easting - FALSE_EASTING) / (K0 * a_r);

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, b) in beta.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        xi_p -= b * (k * xi).sin() * (k * eta).cosh();
        eta_p -= b * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut lat = chi;
    for (j, d) in delta.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        lat += d * (k * chi).sin();
    }
    let lon = zone.central_meridian().to_radians() + eta_p.sinh().atan2(xi_p.cos());

    (lon.to_degrees(), lat.to_degrees())
}

#[cfg(test)]
fn utm_forward(lon: f64, lat: f64, zone: &UtmZone) -> (f64, f64) {
    let n = third_flattening(&zone.ellipsoid);
    let a_r = rectifying_radius(&zone.ellipsoid, n);
    let alpha = [
        n / 2.0 - 2.0 * n.powi(2) / 3.0 + 5.0 * n.powi(3) / 16.0,
        13.0 * n.powi(2) / 48.0 - 3.0 * n.powi(3) / 5.0,
        61.0 * n.powi(3) / 240.0,
    ];
    let phi = lat.to_radians();
    let dlambda = (lon - zone.central_meridian()).to_radians();
    let c = 2.0 * n.sqrt() / (1.0 + n);
    let t = (phi.sin().atanh() - c * (c * phi.sin()).atanh()).sinh();
    let xi_p = (t / dlambda.cos()).atan();
    let eta_p = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut e = eta_p;
    let mut nn = xi_p;
    for (j, a) in alpha.iter().enumerate() {
        let k = 2.0 * (j as f64 + 1.0);
        e += a * (k * xi_p).cos() * (k * eta_p).sinh();
        nn += a * (k * xi_p).sin() * (k * eta_p).cosh();
    }
    (
        FALSE_EASTING + K0 * a_r * e,
        zone.false_northing() + K0 * a_r * nn,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts_longitudes() {
        assert_eq!(lon_360_to_180(314.463), -45.537);
        assert_eq!(lon_360_to_180(134.463), 134.463);
        assert_eq!(lon_360_to_180(180.0), -180.0);
        assert_eq!(lon_360_to_180(-10.0), -10.0);
        assert_eq!(lon_360_to_180(0.0), 0.0);
    }

    #[test]
    fn parses_epsg_codes() {
        assert_eq!(parse_epsg("EPSG:25831").unwrap(), 25831);
        assert_eq!(parse_epsg(" 4326 ").unwrap(), 4326);
        assert!(parse_epsg("UTM31").is_err());
        assert_eq!(parse_epsg("urn:ogc:def:crs:EPSG::25831").unwrap(), 25831);
        assert_eq!(parse_epsg("urn:ogc:def:crs:EPSG:6.6:4326").unwrap(), 4326);
        assert!(parse_epsg("urn:ogc:def:crs:OGC::CRS84").is_err());
    }

    #[test]
    fn central_meridian_on_equator() {
        let p = to_wgs84(500_000.0, 0.0, 32631).unwrap();
        assert!((p.x() - 3.0).abs() < 1e-9);
        assert!(p.y().abs() < 1e-9);
    }

    #[test]
    fn hoek_van_holland_from_etrs89_utm31() {
        let p = to_wgs84(576_917.67, 5_759_136.15, 25831).unwrap();
        assert!((p.x() - 4.12).abs() < 0.02, "lon {}", p.x());
        assert!((p.y() - 51.98).abs() < 0.02, "lat {}", p.y());
    }

    #[test]
    fn southern_hemisphere_round_trip() {
        let zone = utm_zone(32756).unwrap();
        let (e, n) = utm_forward(151.2093, -33.8688, &zone);
        let p = to_wgs84(e, n, 32756).unwrap();
        assert!((p.x() - 151.2093).abs() < 1e-8);
        assert!((p.y() + 33.8688).abs() < 1e-8);
    }

    #[test]
    fn identity_for_geographic_codes() {
        let p = to_wgs84(4.5, 52.1, EPSG_WGS84).unwrap();
        assert_eq!((p.x(), p.y()), (4.5, 52.1));
    }

    #[test]
    fn rejects_mixed_codes() {
        assert_eq!(single_epsg(["25831", "25831"]).unwrap(), 25831);
        assert!(single_epsg(["25831", "4326"]).is_err());
        assert!(single_epsg(Vec::<&str>::new()).is_err());
    }

    #[cfg(not(feature = "proj"))]
    #[test]
    fn unknown_projection_needs_proj() {
        assert!(to_wgs84(155_000.0, 463_000.0, 28992).is_err());
    }
}
