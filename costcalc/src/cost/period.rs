//! Time window arithmetic: how much of the month has been observed and how much is left to
//! project.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::time::Duration as StdDuration;

use crate::errors::{Error, Result};

/// Source of "now". Read once per request so every domain agrees on the same instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn start_of_month(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}

pub fn start_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}

fn round_to_second(d: Duration) -> Duration {
    let millis = d.num_milliseconds();
    let secs = (millis as f64 / 1000.0).round() as i64;
    Duration::seconds(secs)
}

fn hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}

/// Formats a duration as a PromQL range in whole seconds, e.g. `2592000s`.
pub fn promql_duration(d: Duration) -> String {
    format!("{}s", d.num_seconds().max(0))
}

pub fn promql_std_duration(d: StdDuration) -> String {
    format!("{}s", d.as_secs())
}

/// The window a cost tree is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Evaluation time for projection queries
    pub now: DateTime<Utc>,
    /// The caller chose the window; projections are not allowed
    pub explicit: bool,
}

impl Period {
    /// Start of the current UTC month until now.
    pub fn current_month(now: DateTime<Utc>) -> Self {
        Self {
            start: start_of_month(now),
            end: now,
            now,
            explicit: false,
        }
    }

    /// A caller supplied window.
    pub fn explicit(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::BadRequest {
                message: "start must not be after end".to_string(),
            });
        }
        Ok(Self {
            start,
            end,
            now,
            explicit: true,
        })
    }

    /// Resolves the optional query window into a period, validating the combination with
    /// `skip_estimation`.
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        skip_estimation: bool,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        match (start, end) {
            (None, None) => Ok(Self::current_month(now)),
            (Some(start), Some(end)) if skip_estimation => Self::explicit(start, end, now),
            _ => Err(Error::BadRequest {
                message: "must not provide only one of start or end. must not provide start and stop without skipEstimation"
                    .to_string(),
            }),
        }
    }

    /// `end - start`, rounded to whole seconds.
    pub fn passed(&self) -> Duration {
        round_to_second(self.end - self.start)
    }

    pub fn passed_hours(&self) -> f64 {
        hours(self.passed())
    }

    /// Time from `now` until the next month starts, never negative.
    pub fn remaining(&self) -> Duration {
        let remaining = start_of_next_month(self.now) - self.now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    pub fn remaining_hours(&self) -> f64 {
        hours(self.remaining())
    }

    /// Ratio between the whole month the window starts in and the observed part of it. Used to
    /// extrapolate counters such as request totals.
    pub fn month_multiplier(&self) -> f64 {
        let elapsed = (self.end - self.start).num_milliseconds();
        if elapsed <= 0 {
            return 1.0;
        }
        let month = (start_of_next_month(self.start) - self.start).num_milliseconds();
        month as f64 / elapsed as f64
    }

    /// Checks that a projection may be computed for this window.
    pub fn check_prediction(&self, prediction_based_on: Option<StdDuration>) -> Result<()> {
        if self.explicit && prediction_based_on.is_some() {
            return Err(Error::BadRequest {
                message: "a projection can only be computed for the current month".to_string(),
            });
        }
        Ok(())
    }
}
