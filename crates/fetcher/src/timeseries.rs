//! Harmonized waterlevel series and the rules every written file satisfies.

use std::collections::HashSet;
use std::fmt;

use time::OffsetDateTime;

use crate::{timeutil::round_to_second, Result, SshError, Station};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Meters,
    Centimeters,
    Millimeters,
}

impl LengthUnit {
    pub fn to_meters_factor(&self) -> f64 {
        match self {
            LengthUnit::Meters => 1.0,
            LengthUnit::Centimeters => 0.01,
            LengthUnit::Millimeters => 0.001,
        }
    }

    /// Unit names as they appear in provider metadata
    pub fn parse(value: &str) -> Option<LengthUnit> {
        match value.trim().to_lowercase().as_str() {
            "m" | "meter" | "meters" | "metre" | "metres" => Some(LengthUnit::Meters),
            "cm" | "centimeter" | "centimeters" => Some(LengthUnit::Centimeters),
            "mm" | "millimeter" | "millimeters" => Some(LengthUnit::Millimeters),
            _ => None,
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthUnit::Meters => write!(f, "m"),
            LengthUnit::Centimeters => write!(f, "cm"),
            LengthUnit::Millimeters => write!(f, "mm"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: OffsetDateTime,
    /// `None` for missing or quality-rejected values
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeseries {
    pub samples: Vec<Sample>,
    pub unit: LengthUnit,
}

impl Timeseries {
    pub fn new(unit: LengthUnit) -> Self {
        Timeseries {
            samples: vec![],
            unit,
        }
    }

    pub fn from_samples(samples: Vec<Sample>, unit: LengthUnit) -> Self {
        Timeseries { samples, unit }
    }

    pub fn push(&mut self, time: OffsetDateTime, value: Option<f64>) {
        self.samples.push(Sample { time, value });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Stable sort, so equal timestamps keep their relative order
    pub fn sort_by_time(&mut self) {
        self.samples.sort_by_key(|s| s.time);
    }

    /// Remove repeated timestamps, returns how many samples were removed
    pub fn drop_duplicate_times(&mut self, keep: Keep) -> usize {
        let before = self.samples.len();
        let mut seen = HashSet::with_capacity(before);
        match keep {
            Keep::First => self.samples.retain(|s| seen.insert(s.time)),
            Keep::Last => {
                self.samples.reverse();
                self.samples.retain(|s| seen.insert(s.time));
                self.samples.reverse();
            }
        }
        before - self.samples.len()
    }

    /// Keep samples inside `[time_min, time_max]`; a missing bound is open
    pub fn slice_time(&mut self, time_min: Option<OffsetDateTime>, time_max: Option<OffsetDateTime>) {
        self.samples.retain(|s| {
            time_min.map_or(true, |min| s.time >= min) && time_max.map_or(true, |max| s.time <= max)
        });
    }

    /// Set values to missing where `reject` holds
    pub fn mask(&mut self, mut reject: impl FnMut(&Sample) -> bool) {
        for sample in self.samples.iter_mut() {
            if reject(sample) {
                sample.value = None;
            }
        }
    }

    pub fn into_meters(mut self) -> Self {
        let factor = self.unit.to_meters_factor();
        if self.unit != LengthUnit::Meters {
            for sample in self.samples.iter_mut() {
                sample.value = sample.value.map(|v| v * factor);
            }
            self.unit = LengthUnit::Meters;
        }
        self
    }

    pub fn round_times_to_seconds(&mut self) {
        for sample in self.samples.iter_mut() {
            sample.time = round_to_second(sample.time);
        }
    }

    /// Concatenate series (converted to meters); on equal timestamps the
    /// series listed first wins. The result is sorted by time.
    pub fn merge_prefer_first(series: Vec<Timeseries>) -> Timeseries {
        let mut merged = Timeseries::new(LengthUnit::Meters);
        for one in series {
            merged.samples.extend(one.into_meters().samples);
        }
        merged.drop_duplicate_times(Keep::First);
        merged.sort_by_time();
        merged
    }

    pub fn time_min(&self) -> Option<OffsetDateTime> {
        self.samples.iter().map(|s| s.time).min()
    }

    pub fn time_max(&self) -> Option<OffsetDateTime> {
        self.samples.iter().map(|s| s.time).max()
    }
}

/// A retrieved series tagged with the station it belongs to
#[derive(Debug, Clone)]
pub struct StationTimeseries {
    pub station: Station,
    pub series: Timeseries,
}

impl StationTimeseries {
    /// Attach station attributes. The series must be non-empty and in meters.
    pub fn new(station: Station, series: Timeseries) -> Result<Self> {
        if series.is_empty() {
            return Err(SshError::InvalidArgument(format!(
                "no time axis in series for station '{}'",
                station.station_name_unique
            )));
        }
        if series.unit != LengthUnit::Meters {
            return Err(SshError::InvalidArgument(format!(
                "waterlevel for station '{}' is in {}, expected m",
                station.station_name_unique, series.unit
            )));
        }
        Ok(StationTimeseries { station, series })
    }

    /// Waterlevel values as written to file: 32 bit floats
    pub fn waterlevel_f32(&self) -> impl Iterator<Item = Option<f32>> + '_ {
        self.series.samples.iter().map(|s| s.value.map(|v| v as f32))
    }
}
