use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-project privacy switches; every flag defaults to the strict setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    #[serde(default = "enabled")]
    pub anonymize_ip: bool,
    #[serde(default = "enabled")]
    pub require_consent: bool,
    #[serde(default = "enabled")]
    pub respect_dnt: bool,
}

const fn enabled() -> bool {
    true
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            anonymize_ip: true,
            require_consent: true,
            respect_dnt: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub domain: String,
    pub tracking_code: String,
    pub privacy_settings: PrivacySettings,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Build a project with fresh identifiers and strict privacy defaults
    pub fn new(tenant_id: &str, name: &str, domain: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            domain: domain.to_string(),
            tracking_code: Uuid::new_v4().to_string(),
            privacy_settings: PrivacySettings::default(),
            created_at: Utc::now(),
        }
    }
}
