//! Multi-section CSV report of a project window
//!
//! Rendering is a pure function of its input: the same rollup, events and
//! generation instant always produce the same bytes.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use csv::WriterBuilder;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use crate::analytics::aggregator::{share, AggregationEngine};
use crate::analytics::models::RollupResult;
use crate::analytics::referrer;
use crate::models::{Event, Project};
use crate::storage::{Storage, StorageResult};

/// Raw events included in the detail table
pub const EXPORT_EVENT_LIMIT: i64 = 500;

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// Everything a report is rendered from
pub struct ReportInput<'a> {
    pub project: &'a Project,
    pub rollup: &'a RollupResult,
    /// All scanned events of the window, oldest first
    pub window_events: &'a [Event],
    /// Newest first, at most `EXPORT_EVENT_LIMIT`
    pub recent_events: &'a [Event],
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

pub struct ReportExporter {
    storage: Arc<dyn Storage>,
    engine: Arc<AggregationEngine>,
}

impl ReportExporter {
    pub fn new(storage: Arc<dyn Storage>, engine: Arc<AggregationEngine>) -> Self {
        Self { storage, engine }
    }

    /// Export the `days`-long window ending at `now`
    pub async fn export(
        &self,
        project: &Project,
        days: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<ExportDocument> {
        let (rollup, scan) = self
            .engine
            .aggregate_with_events(&project.id, days, now)
            .await?;
        let recent_events = self
            .storage
            .recent_events(&project.id, scan.range, EXPORT_EVENT_LIMIT)
            .await?;

        let body = render_report(&ReportInput {
            project,
            rollup: &rollup,
            window_events: &scan.events,
            recent_events: &recent_events,
            generated_at: now,
        });

        Ok(ExportDocument {
            filename: format!("analytics_report_{}.csv", now.format("%Y-%m-%d")),
            content_type: CSV_CONTENT_TYPE,
            body,
        })
    }
}

/// Render the report. Never fails; a writer error yields an empty document.
pub fn render_report(input: &ReportInput<'_>) -> String {
    match write_report(input) {
        Ok(report) => report,
        Err(e) => {
            warn!(project_id = %input.project.id, error = %e, "Failed to render report");
            String::new()
        }
    }
}

fn write_report(input: &ReportInput<'_>) -> csv::Result<String> {
    let sections = [
        header_section(input)?,
        overview_section(input.rollup)?,
        top_pages_section(input)?,
        traffic_sources_section(input.rollup)?,
        daily_section(input.window_events)?,
        browser_section(input.rollup)?,
        event_detail_section(input.recent_events)?,
    ];

    // Sections are separated by one blank line
    Ok(sections.join("\n"))
}

/// One titled table; fields containing delimiters or quotes are quoted
fn section<R>(title: &str, header: &[&str], rows: R) -> csv::Result<String>
where
    R: IntoIterator<Item = Vec<String>>,
{
    let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
    writer.write_record([title])?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value)
}

fn signed_percent(value: f64) -> String {
    format!("{:+.1}%", value)
}

fn date(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

fn header_section(input: &ReportInput<'_>) -> csv::Result<String> {
    let window = input.rollup.window;
    section(
        "Analytics Report",
        &["Field", "Value"],
        [
            vec!["Project".to_string(), input.project.name.clone()],
            vec!["Domain".to_string(), input.project.domain.clone()],
            vec![
                "Date Range".to_string(),
                format!("{} to {}", date(window.start), date(window.end)),
            ],
            vec![
                "Period".to_string(),
                format!("Last {} days", input.rollup.days),
            ],
            vec![
                "Generated At".to_string(),
                input.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        ],
    )
}

fn overview_section(rollup: &RollupResult) -> csv::Result<String> {
    section(
        "Overview",
        &["Metric", "Value", "Change vs Previous Period"],
        [
            vec![
                "Total Pageviews".to_string(),
                rollup.total_pageviews.to_string(),
                signed_percent(rollup.pageviews_change),
            ],
            vec![
                "Unique Sessions".to_string(),
                rollup.unique_sessions.to_string(),
                signed_percent(rollup.sessions_change),
            ],
            vec![
                "Total Events".to_string(),
                rollup.total_events.to_string(),
                signed_percent(rollup.events_change),
            ],
            vec![
                "Avg Events per Session".to_string(),
                format!("{:.2}", rollup.avg_events_per_session),
                String::new(),
            ],
        ],
    )
}

fn top_pages_section(input: &ReportInput<'_>) -> csv::Result<String> {
    let mut sessions_per_page: HashMap<&str, HashSet<&str>> = HashMap::new();
    for event in input.window_events.iter().filter(|e| e.is_pageview()) {
        if let Some(url) = event.page_url.as_deref() {
            sessions_per_page
                .entry(url)
                .or_default()
                .insert(event.session_id.as_str());
        }
    }

    let total = input.rollup.total_pageviews;
    let rows = input.rollup.top_pages.iter().map(|page| {
        let sessions = sessions_per_page
            .get(page.url.as_str())
            .map_or(0, HashSet::len);
        vec![
            page.url.clone(),
            page.views.to_string(),
            sessions.to_string(),
            percent(share(page.views, total)),
        ]
    });

    section(
        "Top Pages",
        &["URL", "Views", "Unique Sessions", "% of Pageviews"],
        rows,
    )
}

fn traffic_sources_section(rollup: &RollupResult) -> csv::Result<String> {
    let rows = rollup.referrers.iter().map(|source| {
        vec![
            source.name.clone(),
            source.count.to_string(),
            percent(share(source.count, rollup.total_pageviews)),
        ]
    });

    section(
        "Traffic Sources",
        &["Source", "Visits", "% of Pageviews"],
        rows,
    )
}

fn daily_section(window_events: &[Event]) -> csv::Result<String> {
    let mut days: BTreeMap<NaiveDate, (u64, HashSet<&str>)> = BTreeMap::new();
    for event in window_events {
        let (events, sessions) = days.entry(event.timestamp.date_naive()).or_default();
        *events += 1;
        sessions.insert(event.session_id.as_str());
    }

    let rows = days.into_iter().map(|(day, (events, sessions))| {
        let sessions = sessions.len() as u64;
        let per_session = if sessions == 0 {
            0.0
        } else {
            events as f64 / sessions as f64
        };
        vec![
            day.to_string(),
            events.to_string(),
            sessions.to_string(),
            format!("{:.2}", per_session),
        ]
    });

    section(
        "Daily Breakdown",
        &["Date", "Events", "Sessions", "Events per Session"],
        rows,
    )
}

fn browser_section(rollup: &RollupResult) -> csv::Result<String> {
    // Every event with a user agent lands in exactly one device bucket
    let with_user_agent = rollup.devices.total();
    let rows = rollup.browsers.iter().map(|browser| {
        vec![
            browser.name.clone(),
            browser.count.to_string(),
            percent(share(browser.count, with_user_agent)),
        ]
    });

    section(
        "Browser Usage",
        &["Browser", "Events", "% of Events with User Agent"],
        rows,
    )
}

fn event_detail_section(recent_events: &[Event]) -> csv::Result<String> {
    let rows = recent_events
        .iter()
        .take(EXPORT_EVENT_LIMIT as usize)
        .map(|event| {
            vec![
                event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                event.event_type.clone(),
                event.event_name.clone().unwrap_or_default(),
                event.page_url.clone().unwrap_or_default(),
                event.page_title.clone().unwrap_or_default(),
                event.referrer.clone().unwrap_or_default(),
                referrer::categorize(event.referrer.as_deref()),
                event.session_id.clone(),
                event.country.clone().unwrap_or_default(),
                event.continent.clone().unwrap_or_default(),
            ]
        });

    section(
        &format!("Event Details (latest {})", EXPORT_EVENT_LIMIT),
        &[
            "Timestamp",
            "Event Type",
            "Event Name",
            "Page URL",
            "Page Title",
            "Referrer",
            "Source",
            "Session ID",
            "Country",
            "Continent",
        ],
        rows,
    )
}
