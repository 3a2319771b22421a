use crate::models::{Event, PrivacySettings, Project, TimeRange};
use crate::storage::{EventStore, ProjectKey, ProjectStore, Storage, StorageError, StorageResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

/// Bound for comparisons against millisecond timestamps: a stored value `s`
/// satisfies `s >= millis_ceil(t)` exactly when `s >= t`, likewise for `<`
fn millis_ceil(instant: DateTime<Utc>) -> i64 {
    let millis = instant.timestamp_millis();
    if instant.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

const EVENT_COLUMNS: &str = "id, project_id, session_id, event_type, event_name, page_url, \
    page_title, referrer, user_agent, properties, country, continent, ip_digest, timestamp";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    project_id: String,
    session_id: String,
    event_type: String,
    event_name: Option<String>,
    page_url: Option<String>,
    page_title: Option<String>,
    referrer: Option<String>,
    user_agent: Option<String>,
    properties: Option<String>,
    country: Option<String>,
    continent: Option<String>,
    ip_digest: Option<String>,
    timestamp: i64,
}

impl TryFrom<EventRow> for Event {
    type Error = StorageError;

    fn try_from(row: EventRow) -> StorageResult<Self> {
        let id = Uuid::parse_str(&row.id)
            .with_context(|| format!("Malformed event id {}", row.id))?;
        let properties: Option<Map<String, Value>> = row
            .properties
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Malformed event properties")?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(row.timestamp)
            .ok_or_else(|| anyhow!("Event timestamp out of range: {}", row.timestamp))?;

        Ok(Event {
            id,
            project_id: row.project_id,
            session_id: row.session_id,
            event_type: row.event_type,
            event_name: row.event_name,
            page_url: row.page_url,
            page_title: row.page_title,
            referrer: row.referrer,
            user_agent: row.user_agent,
            properties,
            country: row.country,
            continent: row.continent,
            ip_digest: row.ip_digest,
            timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    tenant_id: String,
    name: String,
    domain: String,
    tracking_code: String,
    anonymize_ip: bool,
    require_consent: bool,
    respect_dnt: bool,
    created_at: i64,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StorageError;

    fn try_from(row: ProjectRow) -> StorageResult<Self> {
        let created_at = DateTime::<Utc>::from_timestamp(row.created_at, 0)
            .ok_or_else(|| anyhow!("Project timestamp out of range: {}", row.created_at))?;

        Ok(Project {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            domain: row.domain,
            tracking_code: row.tracking_code,
            privacy_settings: PrivacySettings {
                anonymize_ip: row.anonymize_ip,
                require_consent: row.require_consent,
                respect_dnt: row.respect_dnt,
            },
            created_at,
        })
    }
}

fn storage_error(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.into())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                domain TEXT NOT NULL,
                tracking_code TEXT NOT NULL,
                anonymize_ip INTEGER NOT NULL DEFAULT 1,
                require_consent INTEGER NOT NULL DEFAULT 1,
                respect_dnt INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_tenant ON projects(tenant_id)")
            .execute(self.pool.as_ref())
            .await?;

        // seq keeps insertion order stable for events sharing a timestamp
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                project_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_name TEXT,
                page_url TEXT,
                page_title TEXT,
                referrer TEXT,
                user_agent TEXT,
                properties TEXT,
                country TEXT,
                continent TEXT,
                ip_digest TEXT,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_project_time ON events(project_id, timestamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    async fn insert_event(&self, event: &Event) -> StorageResult<()> {
        let properties = event
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode event properties")?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (id, project_id, session_id, event_type, event_name, page_url,
                page_title, referrer, user_agent, properties, country, continent, ip_digest, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.project_id)
        .bind(&event.session_id)
        .bind(&event.event_type)
        .bind(&event.event_name)
        .bind(&event.page_url)
        .bind(&event.page_title)
        .bind(&event.referrer)
        .bind(&event.user_agent)
        .bind(properties)
        .bind(&event.country)
        .bind(&event.continent)
        .bind(&event.ip_digest)
        .bind(event.timestamp.timestamp_millis())
        .execute(self.pool.as_ref())
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(())
    }

    async fn find_events(
        &self,
        project_id: &str,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE project_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC, seq ASC
            LIMIT ?
            "#
        ))
        .bind(project_id)
        .bind(millis_ceil(range.start))
        .bind(millis_ceil(range.end))
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn recent_events(
        &self,
        project_id: &str,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE project_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp DESC, seq DESC
            LIMIT ?
            "#
        ))
        .bind(project_id)
        .bind(millis_ceil(range.start))
        .bind(millis_ceil(range.end))
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn count_events(&self, project_id: &str, range: TimeRange) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM events
            WHERE project_id = ? AND timestamp >= ? AND timestamp < ?
            "#,
        )
        .bind(project_id)
        .bind(millis_ceil(range.start))
        .bind(millis_ceil(range.end))
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(storage_error)?;

        Ok(count)
    }
}

#[async_trait]
impl ProjectStore for SqliteStorage {
    async fn insert_project(&self, project: &Project) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO projects (id, tenant_id, name, domain, tracking_code,
                anonymize_ip, require_consent, respect_dnt, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&project.id)
        .bind(&project.tenant_id)
        .bind(&project.name)
        .bind(&project.domain)
        .bind(&project.tracking_code)
        .bind(project.privacy_settings.anonymize_ip)
        .bind(project.privacy_settings.require_consent)
        .bind(project.privacy_settings.respect_dnt)
        .bind(project.created_at.timestamp())
        .execute(self.pool.as_ref())
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(())
    }

    async fn find_project(
        &self,
        project_id: &str,
        key: ProjectKey<'_>,
    ) -> StorageResult<Option<Project>> {
        let (column, value) = match key {
            ProjectKey::TrackingCode(code) => ("tracking_code", code),
            ProjectKey::Tenant(tenant_id) => ("tenant_id", tenant_id),
        };

        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            r#"
            SELECT id, tenant_id, name, domain, tracking_code,
                anonymize_ip, require_consent, respect_dnt, created_at
            FROM projects
            WHERE id = ? AND {column} = ?
            "#
        ))
        .bind(project_id)
        .bind(value)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(storage_error)?;

        row.map(Project::try_from).transpose()
    }
}
