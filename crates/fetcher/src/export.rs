//! Catalog exports: xyn point lists, KML placemarks and flat CSV.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;

use crate::{timeutil::format_utc, Catalog, Result};

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// One `lon lat name` line per station
pub fn write_xyn<W: Write>(catalog: &Catalog, out: &mut W) -> Result<()> {
    for station in catalog.iter() {
        writeln!(
            out,
            "{:13.8} {:13.8} {}",
            station.longitude(),
            station.latitude(),
            station.station_name_unique
        )?;
    }
    Ok(())
}

pub fn ssh_catalog_toxynfile(catalog: &Catalog, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_xyn(catalog, &mut out)?;
    out.flush()?;
    Ok(())
}

pub fn write_kml<W: Write>(catalog: &Catalog, out: W) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer
        .create_element("kml")
        .with_attribute(("xmlns", KML_NAMESPACE))
        .write_inner_content(|w| {
            w.create_element("Document").write_inner_content(|w| {
                for station in catalog.iter() {
                    let coordinates = format!("{},{}", station.longitude(), station.latitude());
                    w.create_element("Placemark").write_inner_content(|w| {
                        w.create_element("name")
                            .write_text_content(BytesText::new(&station.station_name_unique))?;
                        w.create_element("Point").write_inner_content(|w| {
                            w.create_element("coordinates")
                                .write_text_content(BytesText::new(&coordinates))?;
                            Ok(())
                        })?;
                        Ok(())
                    })?;
                }
                Ok(())
            })?;
            Ok(())
        })?;
    Ok(())
}

pub fn ssh_catalog_tokmlfile(catalog: &Catalog, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_kml(catalog, &mut out)?;
    out.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct CatalogRow<'a> {
    source: &'a str,
    station_id: &'a str,
    station_name: &'a str,
    station_name_unique: &'a str,
    country: &'a str,
    longitude: f64,
    latitude: f64,
    time_min: Option<String>,
    time_max: Option<String>,
    time_ndays: Option<f64>,
}

pub fn write_catalog_csv<W: Write>(catalog: &Catalog, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for station in catalog.iter() {
        writer.serialize(CatalogRow {
            source: station.source.as_str(),
            station_id: &station.station_id,
            station_name: &station.station_name,
            station_name_unique: &station.station_name_unique,
            country: &station.country,
            longitude: station.longitude(),
            latitude: station.latitude(),
            time_min: station.time_min.map(format_utc).transpose()?,
            time_max: station.time_max.map(format_utc).transpose()?,
            time_ndays: station.time_ndays(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn ssh_catalog_tocsv(catalog: &Catalog, path: &Path) -> Result<()> {
    write_catalog_csv(catalog, File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{station::test_station, Source};
    use time::macros::datetime;

    fn catalog() -> Catalog {
        let mut hvh = test_station(Source::Rwsddl, "HOEKVHLD", 4.12, 51.98);
        hvh.station_name_unique = "HOEKVHLD".to_string();
        hvh.time_min = Some(datetime!(2000-01-01 0:00 UTC));
        hvh.time_max = Some(datetime!(2000-01-11 0:00 UTC));
        Catalog::new(vec![hvh, test_station(Source::Rwsddl, "VLISSGN", 3.6, 51.44)])
    }

    #[test]
    fn xyn_lines_are_fixed_width() {
        let mut out = vec![];
        write_xyn(&catalog(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let first = text.lines().next().unwrap();
        assert_eq!(first, "   4.12000000   51.98000000 HOEKVHLD");
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn kml_has_one_placemark_per_station() {
        let mut out = vec![];
        write_kml(&catalog(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<?xml"));
        assert_eq!(text.matches("<Placemark>").count(), 2);
        assert!(text.contains("<name>HOEKVHLD</name>"));
        assert!(text.contains("<coordinates>4.12,51.98</coordinates>"));
    }

    #[test]
    fn csv_carries_extents() {
        let mut out = vec![];
        write_catalog_csv(&catalog(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "source,station_id,station_name,station_name_unique,country,longitude,latitude,time_min,time_max,time_ndays"
        );
        assert_eq!(
            lines.next().unwrap(),
            "rwsddl,HOEKVHLD,HOEKVHLD,HOEKVHLD,,4.12,51.98,2000-01-01T00:00:00Z,2000-01-11T00:00:00Z,10.0"
        );
        assert!(lines.next().unwrap().ends_with(",,,"));
    }
}
