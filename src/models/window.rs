use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Half-open span `[start, end)` of event timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days`-long span ending at `now`, starting no earlier than the
    /// earliest representable instant
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: saturating_sub(now, Duration::days(i64::from(days))),
            end: now,
        }
    }

    /// The span of identical length immediately before this one
    pub fn preceding(&self) -> Self {
        let length = self.end - self.start;
        Self {
            start: saturating_sub(self.start, length),
            end: self.start,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

fn saturating_sub(instant: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    instant
        .checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
