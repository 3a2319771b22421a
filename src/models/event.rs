use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event type that aggregation treats specially
pub const PAGEVIEW: &str = "pageview";

/// A persisted tracking event. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub project_id: String,
    pub session_id: String,
    /// `pageview`, `click` or `custom`; other values are stored as-is
    pub event_type: String,
    pub event_name: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Opaque to aggregation
    pub properties: Option<Map<String, Value>>,
    /// ISO country code; `None` means unknown
    pub country: Option<String>,
    /// Continent display name; `None` means unknown
    pub continent: Option<String>,
    /// Truncated one-way digest of the source address
    pub ip_digest: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn is_pageview(&self) -> bool {
        self.event_type == PAGEVIEW
    }
}

/// Caller-supplied fields of a tracking request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEvent {
    pub project_id: String,
    pub tracking_code: String,
    pub session_id: String,
    pub event_type: String,
    pub event_name: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Address hint; when absent the address comes from request metadata
    pub ip_address: Option<String>,
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub consent_given: bool,
    /// Set from the `DNT` request header, never from the body
    #[serde(skip)]
    pub do_not_track: bool,
}
