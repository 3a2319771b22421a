//! On-demand rollup of a project's events over a window
//!
//! Each call scans the requested window and the preceding window of equal
//! length from the event store, then folds both into a `RollupResult`.
//! Nothing is cached between calls. Grouped tables keep first-seen order
//! for equal counts: sorting is stable and never uses a secondary key.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::models::{DailyCount, GeoShare, LabelCount, PageCount, RollupResult};
use crate::analytics::referrer;
use crate::analytics::user_agent::{Browser, Device, DeviceBreakdown};
use crate::config::AnalyticsConfig;
use crate::models::{Event, TimeRange};
use crate::storage::{Storage, StorageResult};

pub const TOP_PAGES_LIMIT: usize = 5;
pub const BROWSERS_LIMIT: usize = 5;
pub const REFERRERS_LIMIT: usize = 10;
pub const COUNTRIES_LIMIT: usize = 10;

pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Illustrative continent split (percent) used when no continent data exists
pub const DEMO_CONTINENT_SHARES: [(&str, u64); 6] = [
    ("North America", 35),
    ("Europe", 25),
    ("Asia", 25),
    ("South America", 10),
    ("Africa", 3),
    ("Oceania", 2),
];

/// Events of one window as returned by the store
#[derive(Debug, Clone)]
pub struct WindowScan {
    pub range: TimeRange,
    /// Oldest first
    pub events: Vec<Event>,
    pub truncated: bool,
}

/// Counter that remembers the order keys were first seen in
pub(crate) struct Tally<K> {
    index: HashMap<K, usize>,
    entries: Vec<(K, u64)>,
}

impl<K: Hash + Eq + Clone> Tally<K> {
    pub(crate) fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, key: K, n: u64) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += n,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, n));
            }
        }
    }

    /// Entries in first-seen order
    pub(crate) fn into_entries(self) -> Vec<(K, u64)> {
        self.entries
    }

    /// Entries by count descending, ties in first-seen order
    pub(crate) fn ranked(self, limit: Option<usize>) -> Vec<(K, u64)> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }
}

/// Percent change with fixed results for zero baselines, rounded to one decimal
pub fn percent_change(current: u64, previous: u64) -> f64 {
    match (previous, current) {
        (0, 0) => 0.0,
        (0, _) => 100.0,
        (_, 0) => -100.0,
        (p, c) => round1((c as f64 - p as f64) / p as f64 * 100.0),
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part` as a percentage of `whole`, 0 when `whole` is 0
pub(crate) fn share(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 / whole as f64 * 100.0)
    }
}

pub(crate) fn count_sessions(events: &[Event]) -> u64 {
    events
        .iter()
        .map(|e| e.session_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64
}

/// Non-blank user agents; a blank header counts as no user agent
fn user_agents(events: &[Event]) -> impl Iterator<Item = &str> {
    events
        .iter()
        .filter_map(|e| e.user_agent.as_deref())
        .filter(|ua| !ua.trim().is_empty())
}

fn pageviews(events: &[Event]) -> u64 {
    events.iter().filter(|e| e.is_pageview()).count() as u64
}

pub struct AggregationEngine {
    storage: Arc<dyn Storage>,
    scan_limit: i64,
    demo_continents: bool,
}

impl AggregationEngine {
    pub fn new(storage: Arc<dyn Storage>, config: &AnalyticsConfig) -> Self {
        Self {
            storage,
            scan_limit: config.scan_limit,
            demo_continents: config.demo_continents,
        }
    }

    /// Roll up the `days`-long window ending at `now`
    pub async fn aggregate(
        &self,
        project_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<RollupResult> {
        let (rollup, _) = self.aggregate_with_events(project_id, days, now).await?;
        Ok(rollup)
    }

    /// Like `aggregate`, also handing back the current window's events
    pub async fn aggregate_with_events(
        &self,
        project_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<(RollupResult, WindowScan)> {
        let current = self.scan(project_id, TimeRange::last_days(now, days)).await?;
        let previous = self.scan(project_id, current.range.preceding()).await?;

        let rollup = summarize(
            project_id,
            days,
            &current,
            &previous.events,
            self.demo_continents,
        );
        Ok((rollup, current))
    }

    /// Fetch one window, capped at the scan limit
    pub async fn scan(&self, project_id: &str, range: TimeRange) -> StorageResult<WindowScan> {
        let events = self
            .storage
            .find_events(project_id, range, self.scan_limit)
            .await?;

        let mut truncated = false;
        if events.len() as i64 >= self.scan_limit {
            let total = self.storage.count_events(project_id, range).await?;
            if total > self.scan_limit {
                warn!(
                    project_id,
                    total,
                    scan_limit = self.scan_limit,
                    "Window exceeds scan limit, rollup covers the oldest events only"
                );
                truncated = true;
            }
        }

        debug!(project_id, count = events.len(), "Scanned window");
        Ok(WindowScan {
            range,
            events,
            truncated,
        })
    }
}

/// Fold the current window (and the previous window's events, for deltas) into a rollup
pub fn summarize(
    project_id: &str,
    days: u32,
    current: &WindowScan,
    previous: &[Event],
    demo_continents: bool,
) -> RollupResult {
    let events = current.events.as_slice();

    let total_pageviews = pageviews(events);
    let unique_sessions = count_sessions(events);
    let total_events = events.len() as u64;
    let avg_events_per_session = if unique_sessions == 0 {
        0.0
    } else {
        round2(total_events as f64 / unique_sessions as f64)
    };

    let (continents, continents_illustrative) =
        continent_shares(events, total_pageviews, demo_continents);

    RollupResult {
        project_id: project_id.to_string(),
        days,
        window: current.range,
        total_pageviews,
        unique_sessions,
        total_events,
        avg_events_per_session,
        pageviews_change: percent_change(total_pageviews, pageviews(previous)),
        sessions_change: percent_change(unique_sessions, count_sessions(previous)),
        events_change: percent_change(total_events, previous.len() as u64),
        top_pages: top_pages(events),
        daily_traffic: daily_traffic(events),
        browsers: browsers(events),
        referrers: referrers(events),
        continents,
        continents_illustrative,
        countries: country_shares(events, total_pageviews),
        devices: devices(events),
        truncated: current.truncated,
    }
}

fn top_pages(events: &[Event]) -> Vec<PageCount> {
    let mut tally = Tally::new();
    for event in events.iter().filter(|e| e.is_pageview()) {
        if let Some(url) = event.page_url.as_deref().filter(|u| !u.is_empty()) {
            tally.add(url, 1);
        }
    }

    tally
        .ranked(Some(TOP_PAGES_LIMIT))
        .into_iter()
        .map(|(url, views)| PageCount {
            url: url.to_string(),
            views,
        })
        .collect()
}

fn daily_traffic(events: &[Event]) -> Vec<DailyCount> {
    let mut days = BTreeMap::new();
    for event in events {
        *days.entry(event.timestamp.date_naive()).or_insert(0u64) += 1;
    }

    days.into_iter()
        .map(|(date, count)| DailyCount { date, count })
        .collect()
}

fn browsers(events: &[Event]) -> Vec<LabelCount> {
    let mut tally = Tally::new();
    for user_agent in user_agents(events) {
        tally.add(Browser::classify(user_agent), 1);
    }

    tally
        .ranked(Some(BROWSERS_LIMIT))
        .into_iter()
        .map(|(browser, count)| LabelCount {
            name: browser.as_str().to_string(),
            count,
        })
        .collect()
}

fn referrers(events: &[Event]) -> Vec<LabelCount> {
    let mut raw = Tally::new();
    for event in events.iter().filter(|e| e.is_pageview()) {
        raw.add(event.referrer.as_deref(), 1);
    }

    let mut buckets = Tally::new();
    for (referrer, count) in raw.into_entries() {
        buckets.add(referrer::categorize(referrer), count);
    }

    buckets
        .ranked(Some(REFERRERS_LIMIT))
        .into_iter()
        .map(|(name, count)| LabelCount { name, count })
        .collect()
}

/// Absent continents are dropped from the grouping, unlike countries
fn continent_shares(
    events: &[Event],
    total_pageviews: u64,
    demo_continents: bool,
) -> (Vec<GeoShare>, bool) {
    let mut tally = Tally::new();
    for event in events.iter().filter(|e| e.is_pageview()) {
        if let Some(continent) = event.continent.as_deref() {
            tally.add(continent, 1);
        }
    }

    let observed: Vec<GeoShare> = tally
        .ranked(None)
        .into_iter()
        .map(|(name, count)| GeoShare {
            name: name.to_string(),
            count,
            percentage: share(count, total_pageviews),
        })
        .collect();

    if observed.is_empty() && total_pageviews > 0 && demo_continents {
        return (demo_continent_shares(total_pageviews), true);
    }
    (observed, false)
}

fn demo_continent_shares(total_pageviews: u64) -> Vec<GeoShare> {
    DEMO_CONTINENT_SHARES
        .iter()
        .map(|(name, percent)| GeoShare {
            name: name.to_string(),
            count: (total_pageviews as f64 * *percent as f64 / 100.0).round() as u64,
            percentage: *percent as f64,
        })
        .collect()
}

/// Absent countries are counted under an explicit "Unknown" bucket
fn country_shares(events: &[Event], total_pageviews: u64) -> Vec<GeoShare> {
    let mut tally = Tally::new();
    for event in events.iter().filter(|e| e.is_pageview()) {
        tally.add(event.country.as_deref().unwrap_or(UNKNOWN_COUNTRY), 1);
    }

    tally
        .ranked(Some(COUNTRIES_LIMIT))
        .into_iter()
        .map(|(name, count)| GeoShare {
            name: name.to_string(),
            count,
            percentage: share(count, total_pageviews),
        })
        .collect()
}

fn devices(events: &[Event]) -> DeviceBreakdown {
    let mut breakdown = DeviceBreakdown::default();
    for user_agent in user_agents(events) {
        breakdown.record(Device::classify(user_agent));
    }
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn event(event_type: &str, session: &str, url: Option<&str>, hours_ago: i64) -> Event {
        Event {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            session_id: session.to_string(),
            event_type: event_type.to_string(),
            event_name: None,
            page_url: url.map(str::to_string),
            page_title: None,
            referrer: None,
            user_agent: None,
            properties: None,
            country: None,
            continent: None,
            ip_digest: None,
            timestamp: now() - Duration::hours(hours_ago),
        }
    }

    fn pageview(session: &str, url: &str) -> Event {
        event("pageview", session, Some(url), 1)
    }

    fn scan(events: Vec<Event>) -> WindowScan {
        WindowScan {
            range: TimeRange::last_days(now(), 7),
            events,
            truncated: false,
        }
    }

    fn rollup(events: Vec<Event>) -> RollupResult {
        summarize("proj-1", 7, &scan(events), &[], true)
    }

    #[test]
    fn test_percent_change_boundaries() {
        assert_eq!(percent_change(0, 0), 0.0);
        assert_eq!(percent_change(5, 0), 100.0);
        assert_eq!(percent_change(0, 5), -100.0);
        assert_eq!(percent_change(15, 10), 50.0);
        assert_eq!(percent_change(1, 3), -66.7);
        assert_eq!(percent_change(7, 6), 16.7);
    }

    #[test]
    fn test_basic_counts_and_top_pages() {
        let result = rollup(vec![
            pageview("s1", "/a"),
            pageview("s1", "/a"),
            pageview("s2", "/b"),
            pageview("s3", "/a"),
        ]);

        assert_eq!(result.total_pageviews, 4);
        assert_eq!(result.unique_sessions, 3);
        assert_eq!(result.total_events, 4);
        assert_eq!(result.avg_events_per_session, 1.33);
        assert_eq!(
            result.top_pages,
            vec![
                PageCount { url: "/a".to_string(), views: 3 },
                PageCount { url: "/b".to_string(), views: 1 },
            ]
        );
    }

    #[test]
    fn test_empty_window() {
        let result = rollup(vec![]);

        assert_eq!(result.total_pageviews, 0);
        assert_eq!(result.avg_events_per_session, 0.0);
        assert_eq!(result.pageviews_change, 0.0);
        assert!(result.top_pages.is_empty());
        assert!(result.continents.is_empty());
        assert!(!result.continents_illustrative);
        assert_eq!(result.devices, DeviceBreakdown::default());
    }

    #[test]
    fn test_top_pages_ties_keep_first_seen_order() {
        let urls = ["/z", "/y", "/x", "/w", "/v", "/u"];
        let mut events: Vec<Event> = urls.iter().map(|u| pageview("s1", u)).collect();
        events.push(pageview("s1", "/u"));

        let result = rollup(events);
        let urls: Vec<&str> = result.top_pages.iter().map(|p| p.url.as_str()).collect();

        assert_eq!(urls, vec!["/u", "/z", "/y", "/x", "/w"]);
    }

    #[test]
    fn test_top_pages_ignore_non_pageviews() {
        let result = rollup(vec![
            event("click", "s1", Some("/a"), 1),
            event("custom", "s1", Some("/a"), 1),
            pageview("s1", "/b"),
        ]);

        assert_eq!(result.top_pages.len(), 1);
        assert_eq!(result.top_pages[0].url, "/b");
        assert_eq!(result.total_events, 3);
        assert_eq!(result.total_pageviews, 1);
    }

    #[test]
    fn test_deltas_against_previous_window() {
        let previous = vec![pageview("old", "/a"), pageview("old", "/a")];
        let current = scan(vec![
            pageview("s1", "/a"),
            pageview("s2", "/a"),
            pageview("s3", "/a"),
        ]);

        let result = summarize("proj-1", 7, &current, &previous, true);

        assert_eq!(result.pageviews_change, 50.0);
        assert_eq!(result.sessions_change, 200.0);
        assert_eq!(result.events_change, 50.0);
    }

    #[test]
    fn test_daily_traffic_ascending_over_all_event_types() {
        let result = rollup(vec![
            event("click", "s1", None, 1),
            event("pageview", "s1", Some("/a"), 30),
            event("pageview", "s1", Some("/a"), 50),
            event("custom", "s1", None, 2),
        ]);

        let days: Vec<(String, u64)> = result
            .daily_traffic
            .iter()
            .map(|d| (d.date.to_string(), d.count))
            .collect();
        assert_eq!(
            days,
            vec![
                ("2024-06-08".to_string(), 1),
                ("2024-06-09".to_string(), 1),
                ("2024-06-10".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_browsers_and_devices() {
        let agents = [
            "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Version/17.0 Mobile/15E148 Safari/604.1",
            "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
        ];
        let mut events: Vec<Event> = agents
            .iter()
            .map(|ua| {
                let mut e = event("click", "s1", None, 1);
                e.user_agent = Some(ua.to_string());
                e
            })
            .collect();
        events.push(event("click", "s1", None, 1));

        let result = rollup(events);

        assert_eq!(result.browsers[0], LabelCount { name: "Chrome".to_string(), count: 2 });
        assert_eq!(result.browsers.len(), 3);
        assert_eq!(result.devices.desktop, 3);
        assert_eq!(result.devices.mobile, 1);
        assert_eq!(result.devices.tablet, 0);
        assert_eq!(result.devices.total(), 4);
    }

    #[test]
    fn test_referrers_sum_per_bucket() {
        let referrers = [
            Some("https://www.google.com/search?q=a"),
            Some("https://google.de/"),
            None,
            Some(""),
            Some("https://news.example.org/x"),
            Some("https://www.google.com/search?q=a"),
        ];
        let events: Vec<Event> = referrers
            .iter()
            .map(|r| {
                let mut e = pageview("s1", "/");
                e.referrer = r.map(str::to_string);
                e
            })
            .collect();

        let result = rollup(events);

        assert_eq!(
            result.referrers,
            vec![
                LabelCount { name: "Google".to_string(), count: 3 },
                LabelCount { name: "Direct".to_string(), count: 2 },
                LabelCount { name: "news.example.org".to_string(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_countries_bucket_unknown_but_continents_drop_it() {
        // Known quirk: absent countries get an explicit bucket, absent continents do not
        let mut us = pageview("s1", "/");
        us.country = Some("US".to_string());
        us.continent = Some("North America".to_string());
        let unknown = pageview("s2", "/");

        let result = rollup(vec![us, unknown]);

        assert_eq!(
            result.countries,
            vec![
                GeoShare { name: "US".to_string(), count: 1, percentage: 50.0 },
                GeoShare { name: "Unknown".to_string(), count: 1, percentage: 50.0 },
            ]
        );
        assert_eq!(
            result.continents,
            vec![GeoShare { name: "North America".to_string(), count: 1, percentage: 50.0 }]
        );
        assert!(!result.continents_illustrative);
    }

    #[test]
    fn test_countries_limited_to_ten() {
        let events: Vec<Event> = (0..12)
            .map(|i| {
                let mut e = pageview("s1", "/");
                e.country = Some(format!("C{i}"));
                e
            })
            .collect();

        let result = rollup(events);
        assert_eq!(result.countries.len(), COUNTRIES_LIMIT);
    }

    #[test]
    fn test_demo_continents_when_no_continent_data() {
        let events: Vec<Event> = (0..200).map(|_| pageview("s1", "/")).collect();

        let result = rollup(events.clone());

        assert!(result.continents_illustrative);
        let shares: Vec<(&str, u64, f64)> = result
            .continents
            .iter()
            .map(|c| (c.name.as_str(), c.count, c.percentage))
            .collect();
        assert_eq!(
            shares,
            vec![
                ("North America", 70, 35.0),
                ("Europe", 50, 25.0),
                ("Asia", 50, 25.0),
                ("South America", 20, 10.0),
                ("Africa", 6, 3.0),
                ("Oceania", 4, 2.0),
            ]
        );

        let disabled = summarize("proj-1", 7, &scan(events), &[], false);
        assert!(disabled.continents.is_empty());
        assert!(!disabled.continents_illustrative);
    }

    #[test]
    fn test_blank_user_agents_are_not_classified() {
        let mut blank = event("click", "s1", None, 1);
        blank.user_agent = Some(String::new());
        let mut spaces = event("click", "s1", None, 1);
        spaces.user_agent = Some("   ".to_string());

        let result = rollup(vec![blank, spaces]);

        assert!(result.browsers.is_empty());
        assert_eq!(result.devices, DeviceBreakdown::default());
        assert_eq!(result.total_events, 2);
    }

    #[test]
    fn test_referrers_limited_to_ten() {
        let events: Vec<Event> = (0..12)
            .map(|i| {
                let mut e = pageview("s1", "/");
                e.referrer = Some(format!("https://site{i}.example.org/"));
                e
            })
            .collect();

        let result = rollup(events);

        assert_eq!(result.referrers.len(), REFERRERS_LIMIT);
        assert_eq!(result.referrers[0].name, "site0.example.org");
        assert_eq!(result.referrers[9].name, "site9.example.org");
    }
}
