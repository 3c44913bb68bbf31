//! Station naming: accent stripping and the canonical `station_name_unique`
//! formats of every provider.

use slog::{warn, Logger};
use unicode_normalization::UnicodeNormalization;

/// Convert to plain ASCII. `ø` has no decomposition so it is mapped to `o`
/// first, anything else without an ASCII base character is dropped.
pub fn remove_accents(input: &str, logger: &Logger) -> String {
    let replaced = input.replace('ø', "o");
    let only_ascii: String = replaced.nfkd().filter(char::is_ascii).collect();

    if input.chars().count() != only_ascii.chars().count() {
        warn!(
            logger,
            "remove_accents() dropped characters: '{}' became '{}'", input, only_ascii
        );
    }
    only_ascii
}

/// Accent-free name with every run of non-alphanumeric characters replaced by
/// a single dash and no leading or trailing dashes
pub fn clean_station_name(input: &str, logger: &Logger) -> String {
    let ascii = remove_accents(input, logger);
    let mut cleaned = String::with_capacity(ascii.len());
    let mut in_separator = false;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            cleaned.push(c);
            in_separator = false;
        } else if !in_separator {
            cleaned.push('-');
            in_separator = true;
        }
    }
    cleaned.trim_matches('-').to_string()
}

pub fn ssc_unique_name(ssc_id: &str, name: &str, logger: &Logger) -> String {
    format!("{}_{}", ssc_id, clean_station_name(name, logger))
}

pub fn uhslc_unique_name(uhslc_id: u32) -> String {
    format!("uhslc-{:03}", uhslc_id)
}

pub fn ioc_unique_name(code: &str, numeric_code: &str) -> String {
    format!("ioc-{}-{}", code, numeric_code)
}

pub fn psmsl_gnssir_unique_name(station_id: &str, code: &str) -> String {
    format!("psmsl-gnssir-{}-{}", station_id, code)
}

pub fn gtsm3_era5_unique_name(station_id: &str, station_name: &str) -> String {
    format!("gtsm3-era5-{}-{}", station_id, station_name)
}

/// File stem of a CMEMS in-situ file, e.g. `NO_TS_TG_Bergen_20231101`
pub fn cmems_file_stem(file_name: &str) -> String {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    base.strip_suffix(".nc").unwrap_or(base).to_string()
}

/// CMEMS platform code: the fourth `_`-separated token of the file stem
pub fn cmems_platform_code(file_stem: &str) -> String {
    file_stem.split('_').nth(3).unwrap_or(file_stem).to_string()
}
