use crate::models::{Event, Project, TimeRange};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Credential a project lookup is scoped by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKey<'a> {
    /// Public tracking code embedded in the site snippet
    TrackingCode(&'a str),
    /// Tenant identity yielded by the auth layer
    Tenant(&'a str),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a single event
    async fn insert_event(&self, event: &Event) -> StorageResult<()>;

    /// Events of a project inside `range`, oldest first, truncated after `limit` rows
    async fn find_events(
        &self,
        project_id: &str,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<Event>>;

    /// Events of a project inside `range`, newest first, truncated after `limit` rows
    async fn recent_events(
        &self,
        project_id: &str,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<Event>>;

    /// Number of events of a project inside `range`
    async fn count_events(&self, project_id: &str, range: TimeRange) -> StorageResult<i64>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Register a project
    async fn insert_project(&self, project: &Project) -> StorageResult<()>;

    /// Look up a project by id, but only if `key` matches it
    async fn find_project(
        &self,
        project_id: &str,
        key: ProjectKey<'_>,
    ) -> StorageResult<Option<Project>>;
}

#[async_trait]
pub trait Storage: EventStore + ProjectStore {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;
}
