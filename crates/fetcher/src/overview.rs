//! Statistics over a directory of retrieved waterlevel files.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use slog::{info, Logger};
use time::OffsetDateTime;

use crate::{
    parquet_handler::{read_waterlevel, WaterlevelFile},
    timeutil::{days_between, format_date, round_hour},
    Result,
};

pub const OVERVIEW_DIR_NAME: &str = "overview";
pub const OVERVIEW_FILE_NAME: &str = "waterlevel_data_overview.csv";

const HEADER: [&str; 17] = [
    "fname_clean",
    "longitude",
    "latitude",
    "tstart",
    "tstop",
    "ndays",
    "#values",
    "#nan",
    "%nan",
    "dt min [min]",
    "dt max [min]",
    "dt mean [min]",
    "dt mode [min]",
    "ndupl",
    "min",
    "max",
    "#hours available",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FileStats {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub tstart: Option<OffsetDateTime>,
    pub tstop: Option<OffsetDateTime>,
    pub ndays: Option<f64>,
    pub nvalues: usize,
    pub nnan: usize,
    pub dt_min: Option<i64>,
    pub dt_max: Option<i64>,
    pub dt_mean: Option<f64>,
    pub dt_mode: Option<f64>,
    pub nduplicates: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// unique full hours with a value inside the requested window
    pub hours_available: usize,
}

impl FileStats {
    pub fn percent_nan(&self) -> Option<f64> {
        (self.nvalues > 0).then(|| self.nnan as f64 / self.nvalues as f64 * 100.0)
    }

    fn to_record(&self) -> Result<Vec<String>> {
        let float = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_default();
        let int = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_default();
        Ok(vec![
            self.name.clone(),
            format!("{:.2}", self.longitude),
            format!("{:.2}", self.latitude),
            self.tstart.map(format_date).transpose()?.unwrap_or_default(),
            self.tstop.map(format_date).transpose()?.unwrap_or_default(),
            float(self.ndays),
            self.nvalues.to_string(),
            self.nnan.to_string(),
            float(self.percent_nan()),
            int(self.dt_min),
            int(self.dt_max),
            float(self.dt_mean),
            float(self.dt_mode),
            self.nduplicates.to_string(),
            float(self.min),
            float(self.max),
            self.hours_available.to_string(),
        ])
    }
}

/// Most frequent step, the smallest one on ties
fn mode_seconds(diffs: &[i64]) -> Option<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for diff in diffs {
        *counts.entry(*diff).or_default() += 1;
    }
    let highest = counts.values().copied().max()?;
    counts.into_iter().find(|(_, count)| *count == highest).map(|(diff, _)| diff)
}

pub fn file_stats(
    name: &str,
    file: &WaterlevelFile,
    time_min: Option<OffsetDateTime>,
    time_max: Option<OffsetDateTime>,
) -> FileStats {
    let mut samples: Vec<(OffsetDateTime, Option<f32>)> =
        file.times.iter().copied().zip(file.values.iter().copied()).collect();
    samples.sort_by_key(|(time, _)| *time);

    let tstart = samples.first().map(|(t, _)| *t);
    let tstop = samples.last().map(|(t, _)| *t);
    let diffs: Vec<i64> = samples
        .windows(2)
        .map(|pair| (pair[1].0 - pair[0].0).whole_seconds())
        .collect();
    let to_minutes = |seconds: i64| seconds as f64 / 60.0;

    let values: Vec<f64> = samples
        .iter()
        .filter_map(|(_, v)| v.map(f64::from))
        .filter(|v| v.is_finite())
        .collect();
    let mut seen = HashSet::with_capacity(samples.len());
    let nduplicates = samples.iter().filter(|(t, _)| !seen.insert(*t)).count();

    let hours: HashSet<OffsetDateTime> = samples
        .iter()
        .filter(|(_, v)| v.is_some_and(f32::is_finite))
        .map(|(t, _)| *t)
        .filter(|t| time_min.map_or(true, |min| *t >= min) && time_max.map_or(true, |max| *t <= max))
        .map(round_hour)
        .collect();

    FileStats {
        name: name.to_string(),
        longitude: file.longitude,
        latitude: file.latitude,
        tstart,
        tstop,
        ndays: tstart
            .zip(tstop)
            .map(|(start, stop)| (days_between(start, stop) * 100.0).round() / 100.0),
        nvalues: samples.len(),
        nnan: samples.len() - values.len(),
        dt_min: diffs.iter().min().map(|s| to_minutes(*s).trunc() as i64),
        dt_max: diffs.iter().max().map(|s| to_minutes(*s).trunc() as i64),
        dt_mean: (!diffs.is_empty())
            .then(|| diffs.iter().map(|s| to_minutes(*s)).sum::<f64>() / diffs.len() as f64),
        dt_mode: mode_seconds(&diffs).map(to_minutes),
        nduplicates,
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
        hours_available: hours.len(),
    }
}

/// Write `{dir}/overview/waterlevel_data_overview.csv` for all parquet files in `dir`
pub fn ssh_overview(
    logger: &Logger,
    dir: &Path,
    time_min: Option<OffsetDateTime>,
    time_max: Option<OffsetDateTime>,
) -> Result<PathBuf> {
    let files = sealevel_core::list_files_with_extension(dir, "parquet")?;
    let dir_output = dir.join(OVERVIEW_DIR_NAME);
    sealevel_core::recreate_dir(&dir_output)?;
    info!(logger, "creating overview for {} files", files.len());

    let path = dir_output.join(OVERVIEW_FILE_NAME);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(HEADER)?;
    for file in &files {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let stats = file_stats(&name, &read_waterlevel(file)?, time_min, time_max);
        writer.write_record(stats.to_record()?)?;
    }
    writer.flush()?;
    info!(logger, "wrote overview to {}", path.display());
    Ok(path)
}
