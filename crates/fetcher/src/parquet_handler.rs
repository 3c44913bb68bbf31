use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::format::KeyValue;
use parquet::record::{Field, RecordWriter};
use parquet::{
    basic::{LogicalType, Repetition, Type as PhysicalType},
    schema::types::Type,
};
use parquet_derive::ParquetRecordWriter;
use slog::{info, Logger};
use time::OffsetDateTime;

use crate::{
    timeutil::{format_utc, parse_utc},
    Result, SshError, StationTimeseries,
};

pub const WATERLEVEL_UNITS: &str = "m";

#[derive(Debug, ParquetRecordWriter)]
pub struct WaterlevelRecord {
    pub station_name: String,
    pub station_id: String,
    pub station_x_coordinate: f64,
    pub station_y_coordinate: f64,
    pub time: String,
    pub waterlevel: Option<f32>,
}

fn string_column(name: &str) -> Result<Type> {
    Ok(Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()?)
}

fn double_column(name: &str) -> Result<Type> {
    Ok(Type::primitive_type_builder(name, PhysicalType::DOUBLE)
        .with_repetition(Repetition::REQUIRED)
        .build()?)
}

pub fn create_waterlevel_schema() -> Result<Type> {
    let waterlevel = Type::primitive_type_builder("waterlevel", PhysicalType::FLOAT)
        .with_repetition(Repetition::OPTIONAL)
        .build()?;

    Ok(Type::group_type_builder("waterlevel_series")
        .with_fields(vec![
            Arc::new(string_column("station_name")?),
            Arc::new(string_column("station_id")?),
            Arc::new(double_column("station_x_coordinate")?),
            Arc::new(double_column("station_y_coordinate")?),
            Arc::new(string_column("time")?),
            Arc::new(waterlevel),
        ])
        .build()?)
}

/// Station attributes stored next to the rows
pub fn station_metadata(data: &StationTimeseries) -> Vec<KeyValue> {
    let station = &data.station;
    [
        ("station_name", station.station_name.clone()),
        ("station_id", station.station_id.clone()),
        ("station_name_unique", station.station_name_unique.clone()),
        ("country", station.country.clone()),
        ("source", station.source.to_string()),
        ("longitude", station.longitude().to_string()),
        ("latitude", station.latitude().to_string()),
        ("waterlevel_units", WATERLEVEL_UNITS.to_string()),
        ("time_zone", "UTC".to_string()),
    ]
    .into_iter()
    .map(|(key, value)| KeyValue::new(key.to_string(), value))
    .collect()
}

pub fn to_records(data: &StationTimeseries) -> Result<Vec<WaterlevelRecord>> {
    let station = &data.station;
    data.series
        .samples
        .iter()
        .zip(data.waterlevel_f32())
        .map(|(sample, waterlevel)| {
            Ok(WaterlevelRecord {
                station_name: station.station_name.clone(),
                station_id: station.station_id.clone(),
                station_x_coordinate: station.longitude(),
                station_y_coordinate: station.latitude(),
                time: format_utc(sample.time)?,
                waterlevel,
            })
        })
        .collect()
}

pub fn waterlevel_file_path(dir: &Path, station_name_unique: &str) -> PathBuf {
    dir.join(format!("{}.parquet", station_name_unique))
}

/// Writes `{dir}/{station_name_unique}.parquet` as a single row group
pub fn save_waterlevel(logger: &Logger, data: &StationTimeseries, dir: &Path) -> Result<PathBuf> {
    let path = waterlevel_file_path(dir, &data.station.station_name_unique);
    let records = to_records(data)?;

    let file = File::create(&path)?;
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(station_metadata(data)))
        .build();
    let mut writer = SerializedFileWriter::new(file, Arc::new(create_waterlevel_schema()?), Arc::new(props))?;

    let mut row_group = writer.next_row_group()?;
    records.as_slice().write_to_row_group(&mut row_group)?;
    row_group.close()?;
    writer.close()?;

    info!(logger, "wrote {} waterlevel rows to {}", records.len(), path.display());
    Ok(path)
}

/// Waterlevel file contents as read back for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct WaterlevelFile {
    pub metadata: BTreeMap<String, String>,
    pub station_name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub times: Vec<OffsetDateTime>,
    pub values: Vec<Option<f32>>,
}

pub fn read_waterlevel(path: &Path) -> Result<WaterlevelFile> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    let metadata: BTreeMap<String, String> = reader
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|kvs| {
            kvs.iter()
                .map(|kv| (kv.key.clone(), kv.value.clone().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    let mut file = WaterlevelFile {
        station_name: metadata.get("station_name").cloned().unwrap_or_default(),
        longitude: f64::NAN,
        latitude: f64::NAN,
        metadata,
        times: vec![],
        values: vec![],
    };

    for row in reader.get_row_iter(None)? {
        let row = row?;
        let mut time = None;
        let mut waterlevel = None;
        for (name, field) in row.get_column_iter() {
            match (name.as_str(), field) {
                ("station_name", Field::Str(s)) => file.station_name.clone_from(s),
                ("station_x_coordinate", Field::Double(x)) => file.longitude = *x,
                ("station_y_coordinate", Field::Double(y)) => file.latitude = *y,
                ("time", Field::Str(s)) => time = Some(parse_utc(s)?),
                ("waterlevel", Field::Float(v)) => waterlevel = Some(*v),
                _ => {}
            }
        }
        let time = time.ok_or_else(|| {
            SshError::parse(format!("waterlevel file {}", path.display()), "row without time")
        })?;
        file.times.push(time);
        file.values.push(waterlevel);
    }
    Ok(file)
}
