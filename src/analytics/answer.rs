//! Free-text questions answered from a rollup
//!
//! Questions are routed by keyword to a fixed set of topics. Each topic
//! renders a templated sentence and a small data payload from the same
//! `RollupResult` the dashboard uses. When an `AnswerService` is configured
//! it writes the answer instead; insights are always derived here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

use crate::analytics::aggregator::AggregationEngine;
use crate::analytics::models::RollupResult;
use crate::storage::StorageResult;

pub const DEFAULT_RANGE_DAYS: u32 = 7;

/// Pageviews above which the strong-traffic insight fires
pub const STRONG_TRAFFIC_THRESHOLD: u64 = 100;

/// External natural-language backend
#[async_trait]
pub trait AnswerService: Send + Sync {
    /// Answer `question` given the structured digest of the window
    async fn answer(&self, question: &str, context: &Value) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Traffic,
    PopularPages,
    Visitors,
    Engagement,
    Summary,
}

/// Checked in order; the first group with a keyword in the question wins
const TOPIC_KEYWORDS: [(&[&str], Topic); 4] = [
    (&["traffic", "trend", "pageview", "view"], Topic::Traffic),
    (&["popular", "page", "top", "most", "visited"], Topic::PopularPages),
    (&["visitor", "session", "user", "unique"], Topic::Visitors),
    (&["event", "interaction", "click", "engagement"], Topic::Engagement),
];

impl Topic {
    pub fn classify(question: &str) -> Self {
        let question = question.to_lowercase();
        TOPIC_KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| question.contains(k)))
            .map_or(Topic::Summary, |(_, topic)| *topic)
    }

    /// Templated sentence and data payload for this topic
    pub fn render(self, rollup: &RollupResult) -> (String, Value) {
        let days = rollup.days;
        match self {
            Topic::Traffic => (
                format!(
                    "You had {} pageviews over the last {} days, {} compared to the previous period.",
                    rollup.total_pageviews,
                    days,
                    describe_change(rollup.pageviews_change)
                ),
                json!({
                    "total_pageviews": rollup.total_pageviews,
                    "pageviews_change": rollup.pageviews_change,
                    "daily_traffic": rollup.daily_traffic,
                }),
            ),
            Topic::PopularPages => {
                let answer = match rollup.top_pages.first() {
                    Some(best) => {
                        let listing: Vec<String> = rollup
                            .top_pages
                            .iter()
                            .map(|p| format!("{} ({})", p.url, p.views))
                            .collect();
                        format!(
                            "Your most visited page is {} with {} views. Top pages: {}.",
                            best.url,
                            best.views,
                            listing.join(", ")
                        )
                    }
                    None => format!("No pageviews were recorded in the last {} days.", days),
                };
                (answer, json!({ "top_pages": rollup.top_pages }))
            }
            Topic::Visitors => (
                format!(
                    "You had {} unique sessions in the last {} days, {} compared to the previous period, averaging {:.2} events per session.",
                    rollup.unique_sessions,
                    days,
                    describe_change(rollup.sessions_change),
                    rollup.avg_events_per_session
                ),
                json!({
                    "unique_sessions": rollup.unique_sessions,
                    "sessions_change": rollup.sessions_change,
                    "avg_events_per_session": rollup.avg_events_per_session,
                }),
            ),
            Topic::Engagement => (
                format!(
                    "{} events were recorded in the last {} days, {} compared to the previous period.",
                    rollup.total_events,
                    days,
                    describe_change(rollup.events_change)
                ),
                json!({
                    "total_events": rollup.total_events,
                    "events_change": rollup.events_change,
                    "avg_events_per_session": rollup.avg_events_per_session,
                }),
            ),
            Topic::Summary => (
                format!(
                    "In the last {} days you had {} pageviews from {} unique sessions and {} events in total.",
                    days, rollup.total_pageviews, rollup.unique_sessions, rollup.total_events
                ),
                json!({
                    "total_pageviews": rollup.total_pageviews,
                    "unique_sessions": rollup.unique_sessions,
                    "total_events": rollup.total_events,
                    "top_pages": rollup.top_pages,
                }),
            ),
        }
    }
}

fn describe_change(change: f64) -> String {
    if change > 0.0 {
        format!("up {:.1}%", change)
    } else if change < 0.0 {
        format!("down {:.1}%", change.abs())
    } else {
        "unchanged".to_string()
    }
}

/// Window length for a date-range label; unknown labels mean the default week
pub fn days_from_range_label(label: Option<&str>) -> u32 {
    match label.map(str::trim) {
        Some("30d") => 30,
        Some("90d") => 90,
        Some("all") => 365,
        _ => DEFAULT_RANGE_DAYS,
    }
}

/// Threshold-based observations, independent of who wrote the answer
pub fn insights(rollup: &RollupResult) -> Vec<String> {
    let mut insights = Vec::new();
    let pageviews = rollup.total_pageviews;

    if pageviews > STRONG_TRAFFIC_THRESHOLD {
        insights.push(format!(
            "Strong traffic: {} pageviews in the last {} days",
            pageviews, rollup.days
        ));
    }

    if pageviews > 0 {
        let per_session = if rollup.unique_sessions == 0 {
            0.0
        } else {
            pageviews as f64 / rollup.unique_sessions as f64
        };
        insights.push(format!("Average {:.1} pageviews per session", per_session));
    }

    if let Some(best) = rollup.top_pages.first() {
        insights.push(format!(
            "{} is your best performer with {} views",
            best.url, best.views
        ));
    }

    if rollup.pageviews_change > 0.0 {
        insights.push(format!(
            "Traffic is up {:.1}% on the previous period",
            rollup.pageviews_change
        ));
    } else if rollup.pageviews_change < 0.0 {
        insights.push(format!(
            "Traffic is down {:.1}% on the previous period",
            rollup.pageviews_change.abs()
        ));
    }

    insights
}

/// Structured digest handed to an `AnswerService`
pub fn context_digest(rollup: &RollupResult) -> Value {
    let daily: Map<String, Value> = rollup
        .daily_traffic
        .iter()
        .map(|d| (d.date.to_string(), json!(d.count)))
        .collect();

    json!({
        "period": format!("last {} days", rollup.days),
        "total_pageviews": rollup.total_pageviews,
        "unique_sessions": rollup.unique_sessions,
        "total_events": rollup.total_events,
        "pageviews_change": rollup.pageviews_change,
        "top_pages": rollup.top_pages,
        "referrers": rollup.referrers,
        "daily_traffic": daily,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub insights: Vec<String>,
    pub data: Value,
}

/// Answer without any external service
pub fn rule_based_answer(question: &str, rollup: &RollupResult) -> Answer {
    let (answer, data) = Topic::classify(question).render(rollup);
    Answer {
        question: question.to_string(),
        answer,
        insights: insights(rollup),
        data,
    }
}

pub struct AnswerGenerator {
    engine: Arc<AggregationEngine>,
    service: Option<Arc<dyn AnswerService>>,
}

impl AnswerGenerator {
    pub fn new(engine: Arc<AggregationEngine>, service: Option<Arc<dyn AnswerService>>) -> Self {
        Self { engine, service }
    }

    pub async fn answer_question(
        &self,
        project_id: &str,
        question: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<Answer> {
        let rollup = self.engine.aggregate(project_id, days, now).await?;
        Ok(self.answer_from_rollup(question, &rollup).await)
    }

    /// The configured service answers when it can, the rules otherwise
    pub async fn answer_from_rollup(&self, question: &str, rollup: &RollupResult) -> Answer {
        let Some(service) = &self.service else {
            return rule_based_answer(question, rollup);
        };

        let context = context_digest(rollup);
        match service.answer(question, &context).await {
            Ok(answer) => Answer {
                question: question.to_string(),
                answer,
                insights: insights(rollup),
                data: context,
            },
            Err(e) => {
                warn!(
                    project_id = %rollup.project_id,
                    error = %e,
                    "Answer service failed, using rule-based answer"
                );
                rule_based_answer(question, rollup)
            }
        }
    }
}
