//! Time-window resolution and bucketing.
//!
//! Every trend aggregation in the service runs on a dense bucket series:
//! callers never filter sparse maps themselves. Bucket edges are computed in
//! the offset carried by the request's `from` timestamp so a "day" aligns to
//! the user's calendar rather than UTC.

use crate::error::ApiError;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike,
};
use std::fmt;
use std::str::FromStr;

/// Symbolic time windows accepted on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeWindow {
    Today,
    Yesterday,
    Week,
    Month,
    Quarter,
    LastWeek,
    LastMonth,
    LastQuarter,
    Year,
    Last24Hours,
    Last7Days,
    Last30Days,
    Last90Days,
}

impl FromStr for TimeWindow {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "lastWeek" => Ok(Self::LastWeek),
            "lastMonth" => Ok(Self::LastMonth),
            "lastQuarter" => Ok(Self::LastQuarter),
            "year" => Ok(Self::Year),
            "last24Hours" => Ok(Self::Last24Hours),
            "last7Days" => Ok(Self::Last7Days),
            "last30Days" => Ok(Self::Last30Days),
            "last90Days" => Ok(Self::Last90Days),
            other => Err(ApiError::BadRequest(format!(
                "unsupported time window: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::LastWeek => "lastWeek",
            Self::LastMonth => "lastMonth",
            Self::LastQuarter => "lastQuarter",
            Self::Year => "year",
            Self::Last24Hours => "last24Hours",
            Self::Last7Days => "last7Days",
            Self::Last30Days => "last30Days",
            Self::Last90Days => "last90Days",
        };
        f.write_str(s)
    }
}

/// Aggregation granularity for trend series.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    Month,
}

impl FromStr for Granularity {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOUR" => Ok(Self::Hour),
            "DAY" => Ok(Self::Day),
            "MONTH" => Ok(Self::Month),
            other => Err(ApiError::BadRequest(format!(
                "unsupported aggregation type: {other:?}"
            ))),
        }
    }
}

/// A resolved `[from, to]` pair. Both endpoints carry the offset the caller
/// supplied (or the server-local offset for symbolic windows); all bucket
/// arithmetic happens in that offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<FixedOffset>,
    pub to: DateTime<FixedOffset>,
}

impl TimeRange {
    pub fn new(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> Result<Self, ApiError> {
        if from > to {
            return Err(ApiError::BadRequest(
                "from date cannot be after to date".to_string(),
            ));
        }
        Ok(Self { from, to })
    }

    /// Resolves the current period. A symbolic window takes preference over
    /// explicit bounds; explicit bounds must both be present.
    pub fn resolve(
        window: Option<TimeWindow>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Self, ApiError> {
        if let Some(window) = window {
            return Ok(Self::from_window(window, Local::now().fixed_offset()));
        }
        match (from, to) {
            (Some(from), Some(to)) => Self::new(parse_timestamp(from)?, parse_timestamp(to)?),
            _ => Err(ApiError::BadRequest(
                "either from/to or timeWindow must be provided".to_string(),
            )),
        }
    }

    /// Resolves the period to compare against. Symbolic windows map to their
    /// natural prior; anything else becomes `[from - (to - from), from]`, so
    /// the previous upper bound coincides with the current lower bound.
    pub fn previous(&self, window: Option<TimeWindow>) -> Self {
        let now = Local::now().fixed_offset();
        match window {
            Some(TimeWindow::Today) => Self::from_window(TimeWindow::Yesterday, now),
            Some(TimeWindow::Week) => Self::from_window(TimeWindow::LastWeek, now),
            Some(TimeWindow::Month) => Self::from_window(TimeWindow::LastMonth, now),
            Some(TimeWindow::Quarter) => Self::from_window(TimeWindow::LastQuarter, now),
            _ => {
                let duration = self.to - self.from;
                Self {
                    from: self.from - duration,
                    to: self.from,
                }
            }
        }
    }

    fn from_window(window: TimeWindow, now: DateTime<FixedOffset>) -> Self {
        let midnight = at_midnight(now);
        match window {
            TimeWindow::Today => Self { from: midnight, to: now },
            TimeWindow::Yesterday => Self {
                from: midnight - Duration::days(1),
                to: midnight,
            },
            TimeWindow::Week => Self {
                from: start_of_week(now),
                to: now,
            },
            TimeWindow::Month => Self {
                from: start_of_month(now),
                to: now,
            },
            TimeWindow::Quarter => Self {
                from: start_of_quarter(now),
                to: now,
            },
            TimeWindow::LastWeek => {
                let this_week = start_of_week(now);
                Self {
                    from: this_week - Duration::days(7),
                    to: this_week - Duration::seconds(1),
                }
            }
            TimeWindow::LastMonth => {
                let this_month = start_of_month(now);
                let prev = previous_month(this_month.date_naive());
                Self {
                    from: with_offset(prev.and_time(NaiveTime::MIN), now.offset()),
                    to: this_month - Duration::seconds(1),
                }
            }
            TimeWindow::LastQuarter => {
                let this_quarter = start_of_quarter(now);
                let mut start = this_quarter.date_naive();
                for _ in 0..3 {
                    start = previous_month(start);
                }
                Self {
                    from: with_offset(start.and_time(NaiveTime::MIN), now.offset()),
                    to: this_quarter - Duration::seconds(1),
                }
            }
            TimeWindow::Year => {
                let jan1 = NaiveDate::from_ymd_opt(now.year(), 1, 1).expect("january 1st exists");
                Self {
                    from: with_offset(jan1.and_time(NaiveTime::MIN), now.offset()),
                    to: now,
                }
            }
            TimeWindow::Last24Hours => Self {
                from: now - Duration::hours(24),
                to: now,
            },
            TimeWindow::Last7Days => Self {
                from: now - Duration::days(7),
                to: now,
            },
            TimeWindow::Last30Days => Self {
                from: now - Duration::days(30),
                to: now,
            },
            TimeWindow::Last90Days => Self {
                from: now - Duration::days(90),
                to: now,
            },
        }
    }
}

/// Parses a user-supplied timestamp tolerantly: RFC 3339 (with or without
/// fractional seconds), `YYYY-MM-DD HH:MM:SS`, or a bare `YYYY-MM-DD`. The
/// two naive forms are interpreted in the server-local offset.
pub fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, ApiError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts);
    }
    let offset = *Local::now().offset();
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(with_offset(naive, &offset));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(with_offset(date.and_time(NaiveTime::MIN), &offset));
    }
    Err(ApiError::BadRequest(format!("unable to parse time {s:?}")))
}

/// Truncates `ts` to its bucket boundary in the timestamp's own offset.
pub fn truncate(ts: DateTime<FixedOffset>, granularity: Granularity) -> DateTime<FixedOffset> {
    match granularity {
        Granularity::Hour => ts
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .expect("zeroing sub-hour fields cannot fail"),
        Granularity::Day => at_midnight(ts),
        Granularity::Month => start_of_month(ts),
    }
}

/// The canonical map key of the bucket containing `ts`: the truncated local
/// wall time rendered as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn bucket_key(ts: DateTime<FixedOffset>, granularity: Granularity) -> String {
    format_key(truncate(ts, granularity))
}

/// Buckets `ts` into the caller's offset first, then computes the key. Raw
/// rows are stored in UTC; formatting them without the conversion would
/// misassign edge events.
pub fn bucket_key_in(
    ts: DateTime<chrono::Utc>,
    offset: &FixedOffset,
    granularity: Granularity,
) -> String {
    bucket_key(ts.with_timezone(offset), granularity)
}

fn format_key(ts: DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// The dense bucket series covering `[from, to]`, both endpoints inclusive.
/// Emitted in strictly ascending order; every bucket is present even if no
/// row falls into it.
pub fn series(range: &TimeRange, granularity: Granularity) -> Vec<DateTime<FixedOffset>> {
    let end = truncate(range.to, granularity);
    let mut current = truncate(range.from, granularity);
    let mut points = Vec::new();
    while current <= end {
        points.push(current);
        current = advance(current, granularity);
    }
    points
}

fn advance(ts: DateTime<FixedOffset>, granularity: Granularity) -> DateTime<FixedOffset> {
    match granularity {
        Granularity::Hour => ts + Duration::hours(1),
        Granularity::Day => ts + Duration::days(1),
        Granularity::Month => {
            let next = next_month(ts.date_naive());
            with_offset(next.and_time(NaiveTime::MIN), ts.offset())
        }
    }
}

fn at_midnight(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    with_offset(ts.date_naive().and_time(NaiveTime::MIN), ts.offset())
}

fn start_of_week(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    // Weeks start on Monday.
    let days_from_monday = ts.weekday().num_days_from_monday() as i64;
    at_midnight(ts) - Duration::days(days_from_monday)
}

fn start_of_month(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let first = ts
        .date_naive()
        .with_day(1)
        .expect("every month has a first day");
    with_offset(first.and_time(NaiveTime::MIN), ts.offset())
}

fn start_of_quarter(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let quarter_month = ((ts.month0() / 3) * 3) + 1;
    let first = NaiveDate::from_ymd_opt(ts.year(), quarter_month, 1)
        .expect("quarter start is a valid date");
    with_offset(first.and_time(NaiveTime::MIN), ts.offset())
}

fn next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is a valid date")
}

fn previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is a valid date")
}

fn with_offset(naive: NaiveDateTime, offset: &FixedOffset) -> DateTime<FixedOffset> {
    offset
        .from_local_datetime(&naive)
        .single()
        .expect("fixed offsets have no DST gaps")
}
