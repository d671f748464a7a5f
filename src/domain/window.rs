//! Validated reporting windows and their cache-recency hints.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One reason a window failed validation. A single bad request can carry
/// several of these at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowViolation {
    #[error("unparseable date {0:?}")]
    InvalidDate(String),
    #[error("start date {0} is in the future")]
    FutureStartDate(NaiveDate),
    #[error("start date {start} predates the earliest allowed {earliest}")]
    StartTooOld {
        start: NaiveDate,
        earliest: NaiveDate,
    },
    #[error("start date is after end date")]
    NegativeInterval,
    #[error("window spans {actual_days} days, more than the allowed {allowed_days}")]
    IntervalTooLarge { actual_days: i64, allowed_days: i64 },
}

/// All violations found while validating one window request.
///
/// Collected rather than short-circuited so a form can show every problem in
/// one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowError {
    pub violations: Vec<WindowViolation>,
}

impl WindowError {
    pub fn contains(&self, violation: &WindowViolation) -> bool {
        self.violations.contains(violation)
    }
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for violation in &self.violations {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for WindowError {}

/// Caller-supplied constraints applied during window validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowBounds {
    pub earliest_start: Option<DateTime<Utc>>,
    pub max_interval: Option<Duration>,
}

/// A validated, boundary-clamped start/end pair scoping one report run.
///
/// Immutable once constructed; every constructor either returns a window that
/// honors `start <= end` or fails with the full set of violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReportWindow {
    /// Parses and validates a start/end string pair as supplied by an admin
    /// form.
    ///
    /// Accepts `YYYY-MM-DD` (bare) or `YYYY-MM-DD HH:MM:SS` /
    /// `YYYY-MM-DDTHH:MM:SS`. A bare end date is widened to 23:59:59, and an
    /// unbounded future end (more than a month ahead, outside the current
    /// year) is clamped to December 31 of the current year. Both adjustments
    /// run only after validation passes, so the reported violations always
    /// describe the input as given.
    pub fn parse(
        start_str: &str,
        end_str: &str,
        bounds: &WindowBounds,
        now: DateTime<Utc>,
    ) -> Result<Self, WindowError> {
        let mut violations = Vec::new();

        let start_parsed = parse_instant(start_str);
        if start_parsed.is_none() {
            violations.push(WindowViolation::InvalidDate(start_str.to_string()));
        }
        let end_parsed = parse_instant(end_str);
        if end_parsed.is_none() {
            violations.push(WindowViolation::InvalidDate(end_str.to_string()));
        }

        if let Some((start, _)) = start_parsed {
            if start > now {
                violations.push(WindowViolation::FutureStartDate(start.date_naive()));
            }
            if let Some(earliest) = bounds.earliest_start {
                if start < earliest {
                    violations.push(WindowViolation::StartTooOld {
                        start: start.date_naive(),
                        earliest: earliest.date_naive(),
                    });
                }
            }
        }

        if let (Some((start, _)), Some((end, _))) = (start_parsed, end_parsed) {
            if start > end {
                violations.push(WindowViolation::NegativeInterval);
            } else if let Some(max) = bounds.max_interval {
                let actual = end - start;
                if actual > max {
                    violations.push(WindowViolation::IntervalTooLarge {
                        actual_days: actual.num_days(),
                        allowed_days: max.num_days(),
                    });
                }
            }
        }

        match (start_parsed, end_parsed) {
            (Some((start, _)), Some((end, end_was_bare))) if violations.is_empty() => {
                let end = if end_was_bare {
                    end_of_day(end.date_naive())
                } else {
                    end
                };
                let end = clamp_unbounded_future(end, now);
                Ok(Self { start, end })
            }
            _ => Err(WindowError { violations }),
        }
    }

    /// Builds a window from instants already in hand (no clamping). Fails
    /// only on a negative interval.
    pub fn from_instants(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError {
                violations: vec![WindowViolation::NegativeInterval],
            });
        }
        Ok(Self { start, end })
    }

    /// Builds a window from epoch-second boundaries (no clamping).
    pub fn from_timestamps(start: i64, end: i64) -> Result<Self, WindowError> {
        let start = instant_from_ts(start)?;
        let end = instant_from_ts(end)?;
        Self::from_instants(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn start_ts(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_ts(&self) -> i64 {
        self.end.timestamp()
    }

    /// Inclusive on both boundaries; the end of a bare-date window already
    /// sits at 23:59:59.
    pub fn contains_ts(&self, timestamp: i64) -> bool {
        timestamp >= self.start_ts() && timestamp <= self.end_ts()
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start.date_naive() && date <= self.end.date_naive()
    }

    /// Stable fragment used when deriving cache keys for this window.
    pub fn cache_fragment(&self) -> String {
        format!("{}_{}", self.start_ts(), self.end_ts())
    }

    /// Cache-duration hint from the window's recency: windows touching today
    /// go stale quickly, windows that ended over a year ago barely change.
    /// Pure; `now` is supplied by the caller's clock.
    pub fn cache_duration(&self, base: StdDuration, now: DateTime<Utc>) -> StdDuration {
        let today = now.date_naive();
        if self.contains_date(today) {
            return StdDuration::from_secs(60 * 60);
        }
        if now - self.end > Duration::days(365) {
            return StdDuration::from_secs(60 * 60 * 24 * 30);
        }
        base
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn instant_from_ts(timestamp: i64) -> Result<DateTime<Utc>, WindowError> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| WindowError {
            violations: vec![WindowViolation::InvalidDate(timestamp.to_string())],
        })
}

fn parse_instant(input: &str) -> Option<(DateTime<Utc>, bool)> {
    let trimmed = input.trim();
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some((Utc.from_utc_datetime(&parsed), false));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some((Utc.from_utc_datetime(&midnight), true));
    }
    None
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    // 23:59:59 exists for every calendar date.
    let instant = date.and_hms_opt(23, 59, 59).unwrap_or_default();
    Utc.from_utc_datetime(&instant)
}

/// An end more than a month out that is not in the current year is taken to
/// mean "no end bound" and pinned to December 31 of the current year.
fn clamp_unbounded_future(end: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let horizon = now.checked_add_months(Months::new(1)).unwrap_or(now);
    if end > horizon && end.year() != now.year() {
        if let Some(year_end) = NaiveDate::from_ymd_opt(now.year(), 12, 31) {
            return end_of_day(year_end);
        }
    }
    end
}
