use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
};

use crate::{Result, SshError};

const DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DATE_TIME: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute][optional [:[second]]][optional [.[subsecond]]]"
);
const DATE_TIME_OFFSET: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute][optional [:[second]]][optional [.[subsecond]]][optional [ ]][offset_hour sign:mandatory][optional [[optional [:]][offset_minute]]]"
);

/// Parse the timestamp flavours found across provider catalogs and data files.
///
/// Accepts RFC3339 (any offset, converted to UTC), `YYYY-MM-DD HH:MM[:SS[.f]]`
/// with `-` or `/` date separators, `T` or space between date and time and an
/// optional `±HH[:MM]` offset, and bare dates. Timestamps without an offset
/// are taken as UTC.
pub fn parse_utc(value: &str) -> Result<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed.to_offset(UtcOffset::UTC));
    }

    let normalized = value.trim_end_matches('Z').replace('/', "-").replacen('T', " ", 1);
    let normalized = normalized.trim();
    if let Ok(parsed) = PrimitiveDateTime::parse(normalized, DATE_TIME) {
        return Ok(parsed.assume_utc());
    }
    if let Ok(parsed) = OffsetDateTime::parse(normalized, DATE_TIME_OFFSET) {
        return Ok(parsed.to_offset(UtcOffset::UTC));
    }
    Date::parse(normalized, DATE)
        .map(|date| date.midnight().assume_utc())
        .map_err(|e| SshError::parse(format!("time '{}'", value), e))
}

/// `YYYY-MM-DDTHH:MM:SSZ`, the representation written to waterlevel files
pub fn format_utc(value: OffsetDateTime) -> Result<String> {
    let description = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    Ok(value.to_offset(UtcOffset::UTC).format(description)?)
}

/// `YYYY-MM-DDTHH:MM:SS` without offset, as expected by the IOC and ERDDAP services
pub fn format_naive(value: OffsetDateTime) -> Result<String> {
    let description = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    Ok(value.to_offset(UtcOffset::UTC).format(description)?)
}

pub fn format_date(value: OffsetDateTime) -> Result<String> {
    Ok(value.format(format_description!("[year]-[month]-[day]"))?)
}

pub fn days_between(start: OffsetDateTime, end: OffsetDateTime) -> f64 {
    (end - start).as_seconds_f64() / 3600.0 / 24.0
}

pub fn round_to_second(value: OffsetDateTime) -> OffsetDateTime {
    let truncated = value.replace_nanosecond(0).unwrap_or(value);
    if value.nanosecond() >= 500_000_000 {
        truncated.checked_add(Duration::SECOND).unwrap_or(truncated)
    } else {
        truncated
    }
}

/// Round down to the start of the hour
pub fn floor_hour(value: OffsetDateTime) -> OffsetDateTime {
    value
        .replace_time(Time::from_hms(value.hour(), 0, 0).unwrap_or(Time::MIDNIGHT))
}

/// Round to the nearest full hour
pub fn round_hour(value: OffsetDateTime) -> OffsetDateTime {
    let floor = floor_hour(value);
    if value - floor >= Duration::minutes(30) {
        floor + Duration::HOUR
    } else {
        floor
    }
}

fn month_start(year: i32, month: Month) -> OffsetDateTime {
    // day 1 is valid for every month
    Date::from_calendar_date(year, month, 1)
        .map(|d| d.midnight().assume_utc())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Calendar months touched by `[start, end]`, each as `(first instant, first instant of next month)`
pub fn month_periods(start: OffsetDateTime, end: OffsetDateTime) -> Vec<(OffsetDateTime, OffsetDateTime)> {
    let mut periods = vec![];
    if end < start {
        return periods;
    }
    let mut current = month_start(start.year(), start.month());
    let last = month_start(end.year(), end.month());
    while current <= last {
        let next = if current.month() == Month::December {
            month_start(current.year() + 1, Month::January)
        } else {
            month_start(current.year(), current.month().next())
        };
        periods.push((current, next));
        current = next;
    }
    periods
}
