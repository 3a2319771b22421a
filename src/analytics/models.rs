//! Data models for analytics rollups

use chrono::NaiveDate;
use serde::Serialize;

use crate::analytics::user_agent::DeviceBreakdown;
use crate::models::TimeRange;

/// Pageviews of one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCount {
    pub url: String,
    pub views: u64,
}

/// Events on one UTC calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

/// Count of a categorical dimension value (browser, referrer bucket)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub name: String,
    pub count: u64,
}

/// Geographic bucket with its share of total pageviews
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoShare {
    pub name: String,
    pub count: u64,
    pub percentage: f64,
}

/// Dashboard rollup of one project window, computed fresh per request
#[derive(Debug, Clone, Serialize)]
pub struct RollupResult {
    pub project_id: String,
    pub days: u32,
    pub window: TimeRange,

    pub total_pageviews: u64,
    pub unique_sessions: u64,
    pub total_events: u64,
    pub avg_events_per_session: f64,

    /// Percent change against the preceding window of equal length
    pub pageviews_change: f64,
    pub sessions_change: f64,
    pub events_change: f64,

    pub top_pages: Vec<PageCount>,
    pub daily_traffic: Vec<DailyCount>,
    pub browsers: Vec<LabelCount>,
    pub referrers: Vec<LabelCount>,
    pub continents: Vec<GeoShare>,
    /// `continents` holds the fixed illustrative split, not observed data
    pub continents_illustrative: bool,
    pub countries: Vec<GeoShare>,
    pub devices: DeviceBreakdown,

    /// The window held more events than the scan limit; the excess is absent
    pub truncated: bool,
}
