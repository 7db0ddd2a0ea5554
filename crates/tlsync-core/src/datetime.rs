use std::cmp::Ordering;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{Result, SyncError};

/// Years below this value cannot be stored on the novel side.
pub const MIN_REPRESENTABLE_YEAR: i64 = 100;

/// Upper view bound used when the events lie outside the processible range.
pub const VIEW_RANGE_LIMIT: &str = "0100-01-01 00:00:00";

const SECONDS_PER_DAY: i64 = 24 * 3600;
const DEFAULT_VIEW_MARGIN_SECONDS: i64 = 3600;

/// Scene duration split into days, hours and minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lasts {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl Lasts {
    fn from_seconds(seconds: i64) -> Self {
        let seconds = seconds.max(0);
        let days = seconds / SECONDS_PER_DAY;
        let rest = seconds % SECONDS_PER_DAY;
        Self {
            days,
            hours: rest / 3600,
            minutes: (rest % 3600) / 60,
        }
    }

    fn as_duration(&self) -> Option<Duration> {
        Duration::try_days(self.days)?
            .checked_add(&Duration::try_hours(self.hours)?)?
            .checked_add(&Duration::try_minutes(self.minutes)?)
    }
}

/// Return `text` with its year zero-padded to four digits.
///
/// Timeline does not pad years below 1000 and writes BC years with a
/// leading `-`, which is kept.
pub fn normalize(text: &str) -> Result<String> {
    let trimmed = text.trim();
    let (is_bc, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start_matches('-')),
        None => (false, trimmed),
    };
    let Some((year, rest)) = unsigned.split_once('-') else {
        return Err(SyncError::MalformedDate(text.to_string()));
    };
    if year.is_empty() || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SyncError::MalformedDate(text.to_string()));
    }
    let sign = if is_bc { "-" } else { "" };
    Ok(format!("{sign}{year:0>4}-{rest}"))
}

/// Signed year component of a (possibly non-canonical) timestamp or date.
pub fn year_of(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let (is_bc, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let year = unsigned
        .split('-')
        .next()
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(|| SyncError::MalformedDate(text.to_string()))?;
    Ok(if is_bc { -year } else { year })
}

/// True when the year can be stored as an absolute date on the novel side.
pub fn year_is_representable(text: &str) -> bool {
    year_of(text).is_ok_and(|year| year >= MIN_REPRESENTABLE_YEAR)
}

/// Split a timestamp into its date and time parts.
pub fn split_date_time(text: &str) -> (&str, &str) {
    match text.trim().split_once(' ') {
        Some((date, time)) => (date, time.trim()),
        None => (text.trim(), "00:00:00"),
    }
}

/// Parse a calendar date of the form `[-]YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let malformed = || SyncError::MalformedDate(text.to_string());
    let year = year_of(text)?;
    let unsigned = text.trim().trim_start_matches('-');
    let mut parts = unsigned.split('-').skip(1);
    let month = parts
        .next()
        .and_then(|value| value.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let day = parts
        .next()
        .and_then(|value| value.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    let year = i32::try_from(year).map_err(|_| malformed())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(malformed)
}

/// Parse a time of day of the form `HH:MM[:SS]`.
pub fn parse_time(text: &str) -> Result<NaiveTime> {
    let malformed = || SyncError::MalformedDate(text.to_string());
    let mut fields = text.trim().split(':').map(|value| value.parse::<u32>().ok());
    let hour = fields.next().flatten().ok_or_else(malformed)?;
    let minute = fields.next().flatten().ok_or_else(malformed)?;
    let second = match fields.next() {
        Some(value) => value.ok_or_else(malformed)?,
        None => 0,
    };
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(malformed)
}

/// Parse a timeline timestamp, normalizing it first.
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let canonical = normalize(text)?;
    let (date, time) = split_date_time(&canonical);
    Ok(NaiveDateTime::new(parse_date(date)?, parse_time(time)?))
}

/// Format a date in canonical form.
pub fn format_date(date: NaiveDate) -> String {
    let year = date.year();
    let sign = if year < 0 { "-" } else { "" };
    format!(
        "{sign}{:04}-{:02}-{:02}",
        year.unsigned_abs(),
        date.month(),
        date.day()
    )
}

/// Format a timestamp in canonical form.
pub fn format_timestamp(value: NaiveDateTime) -> String {
    format!(
        "{} {:02}:{:02}:{:02}",
        format_date(value.date()),
        value.hour(),
        value.minute(),
        value.second()
    )
}

/// Duration between two representable timestamps.
///
/// An `end` before `start` yields a zero duration.
pub fn compute_duration(start: &str, end: &str) -> Result<Lasts> {
    let start = parse_timestamp(start)?;
    let end = parse_timestamp(end)?;
    Ok(Lasts::from_seconds(
        end.signed_duration_since(start).num_seconds(),
    ))
}

/// Return `start` shifted by the given duration.
pub fn add_lasts(start: &str, lasts: Lasts) -> Result<String> {
    let start_dt = parse_timestamp(start)?;
    lasts
        .as_duration()
        .and_then(|duration| start_dt.checked_add_signed(duration))
        .map(format_timestamp)
        .ok_or_else(|| SyncError::MalformedDate(start.to_string()))
}

/// Compare two canonical timestamps chronologically.
///
/// Plain string comparison is wrong for BC years, where a larger magnitude
/// is earlier. Strings that do not look like timestamps compare lexically.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => a.cmp(b),
    }
}

fn sort_key(text: &str) -> Option<(i64, &str)> {
    let year = year_of(text).ok()?;
    let unsigned = text.trim().trim_start_matches('-');
    let (_, rest) = unsigned.split_once('-')?;
    Some((year, rest))
}

/// Running lower and upper bound of the timestamps written to a timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub min: Option<String>,
    pub max: Option<String>,
}

impl DateRange {
    pub fn include_start(&mut self, start: &str) {
        if self
            .min
            .as_deref()
            .is_none_or(|min| compare(start, min) == Ordering::Less)
        {
            self.min = Some(start.to_string());
        }
    }

    pub fn include_end(&mut self, end: &str) {
        if self
            .max
            .as_deref()
            .is_none_or(|max| compare(end, max) == Ordering::Greater)
        {
            self.max = Some(end.to_string());
        }
    }

    /// Padded display window around the collected bounds.
    pub fn view_range(&self, default_date_time: &str) -> Result<(String, String)> {
        compute_view_range(
            self.min.as_deref(),
            self.max.as_deref(),
            default_date_time,
        )
    }
}

/// Display window for Timeline's `displayed_period`.
///
/// Expands `[dt_min, dt_max]` by a margin of a tenth of the span, or one hour
/// for spans up to a day. Out-of-range minimum years return the sentinel
/// window; arithmetic overflow leaves the affected bound as it is.
pub fn compute_view_range(
    dt_min: Option<&str>,
    dt_max: Option<&str>,
    default_date_time: &str,
) -> Result<(String, String)> {
    let dt_min = dt_min.unwrap_or(default_date_time).to_string();
    let mut dt_max = dt_max.map(str::to_string).unwrap_or_else(|| dt_min.clone());

    if !year_is_representable(&dt_min) {
        if dt_max == dt_min {
            dt_max = VIEW_RANGE_LIMIT.to_string();
        }
        return Ok((dt_min, dt_max));
    }

    let range_min = parse_timestamp(&dt_min)?;
    let range_max = parse_timestamp(&dt_max)?;
    let span = range_max.signed_duration_since(range_min).num_seconds();
    let margin = if span > SECONDS_PER_DAY {
        // Keep the fractional second; the formatted bounds truncate it.
        Duration::milliseconds(span * 100)
    } else {
        Duration::seconds(DEFAULT_VIEW_MARGIN_SECONDS)
    };

    let view_min = range_min
        .checked_sub_signed(margin)
        .map(format_timestamp)
        .unwrap_or(dt_min);
    let view_max = range_max
        .checked_add_signed(margin)
        .map(format_timestamp)
        .unwrap_or(dt_max);
    Ok((view_min, view_max))
}
