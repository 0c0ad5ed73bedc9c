//! Requested time window and parsing of user supplied instants

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use humantime_serde::re::humantime;

use crate::errors::{ConfigError, ConfigResult};

const INSTANT_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Inclusive `[start, end]` window in epoch milliseconds
///
/// `end == None` means the window is open ended. The offset is the one the
/// remote tree uses for its `YYYY/MM/DD` directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start_millis: i64,
    end_millis: Option<i64>,
    offset: FixedOffset,
}

impl TimeWindow {
    /// Build a window, rejecting `end < start`
    pub fn new(start_millis: i64, end_millis: Option<i64>, offset: FixedOffset) -> ConfigResult<Self> {
        if let Some(end) = end_millis {
            if end < start_millis {
                return Err(ConfigError::InvalidValue {
                    field: "end_date".to_string(),
                    value: end.to_string(),
                    reason: format!("end precedes start ({})", start_millis),
                });
            }
        }
        Ok(Self {
            start_millis,
            end_millis,
            offset,
        })
    }

    pub fn start_millis(&self) -> i64 {
        self.start_millis
    }

    pub fn end_millis(&self) -> Option<i64> {
        self.end_millis
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Whether `millis` lies inside the window
    pub fn contains(&self, millis: i64) -> bool {
        millis >= self.start_millis && self.end_millis.map_or(true, |end| millis <= end)
    }

    /// Relative tree path `/YYYY/MM/DD/<end>` of the window end
    ///
    /// Any branch whose relative path compares greater than this cannot hold
    /// data from inside the window.
    pub fn end_path(&self) -> Option<String> {
        let end = self.end_millis?;
        let date = self.local(end)?;
        Some(format!("{}/{}", date.format("/%Y/%m/%d"), end))
    }

    /// Default output folder name `dump_<start>_<end>` in `yyyyMMddHHmm`
    pub fn default_output_name(&self) -> String {
        let stamp = |millis: i64| {
            self.local(millis)
                .map(|t| t.format("%Y%m%d%H%M").to_string())
                .unwrap_or_else(|| millis.to_string())
        };
        let end = match self.end_millis {
            Some(end) => stamp(end),
            None => "now".to_string(),
        };
        format!("dump_{}_{}", stamp(self.start_millis), end)
    }

    fn local(&self, millis: i64) -> Option<DateTime<FixedOffset>> {
        self.offset.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |millis: i64| {
            self.local(millis)
                .map(|t| t.format("%Y-%m-%d %H:%M %:z").to_string())
                .unwrap_or_else(|| millis.to_string())
        };
        match self.end_millis {
            Some(end) => write!(f, "{} .. {}", show(self.start_millis), show(end)),
            None => write!(f, "{} .. (open)", show(self.start_millis)),
        }
    }
}

/// Parse a time instant into epoch milliseconds
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` in `offset`, raw epoch
/// milliseconds, `now`, or a relative duration such as `2h` or `1day`
/// meaning that long before `now_millis`.
pub fn parse_instant(input: &str, offset: FixedOffset, now_millis: i64) -> ConfigResult<i64> {
    let input = input.trim();
    let invalid = |reason: &str| ConfigError::InvalidTime {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("empty time"));
    }
    if input.eq_ignore_ascii_case("now") {
        return Ok(now_millis);
    }
    if input.bytes().all(|b| b.is_ascii_digit()) && input.len() > 8 {
        return input
            .parse::<i64>()
            .map_err(|_| invalid("epoch milliseconds out of range"));
    }

    let naive = INSTANT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        });
    if let Some(naive) = naive {
        return offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.timestamp_millis())
            .ok_or_else(|| invalid("time does not exist in the time zone"));
    }

    let duration = humantime::parse_duration(input)
        .map_err(|e| invalid(&format!("not a date, epoch millis or duration: {}", e)))?;
    let millis = i64::try_from(duration.as_millis()).map_err(|_| invalid("duration too long"))?;
    Ok(now_millis.saturating_sub(millis))
}

/// Parse a UTC offset such as `+03:00`, `-0530`, `GMT+3` or `UTC`
pub fn parse_offset(input: &str) -> ConfigResult<FixedOffset> {
    let trimmed = input.trim();
    let invalid = || ConfigError::InvalidValue {
        field: "time_zone".to_string(),
        value: input.to_string(),
        reason: "expected a UTC offset like +03:00".to_string(),
    };

    let rest = trimmed
        .strip_prefix("GMT")
        .or_else(|| trimmed.strip_prefix("UTC"))
        .unwrap_or(trimmed);
    if rest.is_empty() || rest == "Z" {
        return Ok(utc());
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return Err(invalid()),
    };
    if !digits.is_ascii() {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn utc() -> FixedOffset {
    Utc.fix()
}
