//! CF-convention helpers for the NetCDF based providers.

use time::{Duration, OffsetDateTime};

use crate::{
    timeutil::{parse_utc, round_to_second},
    Result, SshError,
};

/// Decode `<unit> since <reference>` time values, rounded to whole seconds.
/// Missing (non-finite) values decode to `None`; values outside the
/// representable range are an error.
pub fn cf_times(values: &[f64], units: &str) -> Result<Vec<Option<OffsetDateTime>>> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| SshError::parse("time units", format!("'{}' has no 'since'", units)))?;
    let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
        "seconds" | "second" | "secs" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        other => return Err(SshError::parse("time units", format!("unsupported unit '{}'", other))),
    };
    let reference = reference.trim();
    let reference = parse_utc(reference.strip_suffix(" UTC").unwrap_or(reference))?;

    values
        .iter()
        .map(|v| {
            if !v.is_finite() {
                return Ok(None);
            }
            Duration::checked_seconds_f64(v * seconds_per_unit)
                .and_then(|offset| reference.checked_add(offset))
                .map(|time| Some(round_to_second(time)))
                .ok_or_else(|| SshError::parse("time values", format!("{} {} out of range", v, units)))
        })
        .collect()
}

/// Values equal to `fill` become NaN
pub fn mask_fill(values: Vec<f64>, fill: Option<f64>) -> Vec<f64> {
    values
        .into_iter()
        .map(|v| if fill.is_some_and(|f| v == f) { f64::NAN } else { v })
        .collect()
}

/// Largest finite value, `None` when all are missing
pub fn max_finite(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

#[cfg(feature = "netcdf")]
pub(crate) fn attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Double(d) => Some(d),
            netcdf::AttributeValue::Float(f) => Some(f as f64),
            netcdf::AttributeValue::Int(i) => Some(i as f64),
            netcdf::AttributeValue::Short(s) => Some(s as f64),
            netcdf::AttributeValue::Schar(b) => Some(b as f64),
            netcdf::AttributeValue::Uchar(b) => Some(b as f64),
            _ => None,
        })
}

#[cfg(feature = "netcdf")]
pub(crate) fn attr_str(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        })
}

#[cfg(feature = "netcdf")]
pub(crate) fn variable<'f>(file: &'f netcdf::File, name: &str) -> Result<netcdf::Variable<'f>> {
    file.variable(name)
        .ok_or_else(|| SshError::parse("NetCDF file", format!("variable '{}' missing", name)))
}

/// Unpacked values; fill values become NaN
#[cfg(feature = "netcdf")]
pub(crate) fn unpack(var: &netcdf::Variable, raw: Vec<f64>) -> Vec<f64> {
    let scale = attr_f64(var, "scale_factor").unwrap_or(1.0);
    let offset = attr_f64(var, "add_offset").unwrap_or(0.0);
    mask_fill(raw, attr_f64(var, "_FillValue"))
        .into_iter()
        .map(|v| if v.is_finite() { v * scale + offset } else { f64::NAN })
        .collect()
}

/// Decoded time axis; fill values decode to `None`
#[cfg(feature = "netcdf")]
pub(crate) fn read_times(var: &netcdf::Variable) -> Result<Vec<Option<OffsetDateTime>>> {
    let units = attr_str(var, "units")
        .ok_or_else(|| SshError::parse("NetCDF time", "time variable has no units"))?;
    let values = mask_fill(var.get_values::<f64, _>(..)?, attr_f64(var, "_FillValue"));
    cf_times(&values, &units)
}
