//! Event ingestion: project verification, privacy gate, geo resolution, persistence

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::analytics::geo::GeoResolver;
use crate::analytics::privacy::{self, PrivacyDecision};
use crate::models::{Event, NewEvent};
use crate::storage::{ProjectKey, Storage, StorageError};

/// Result of a tracking request that was processed without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Tracked(Uuid),
    ConsentRequired,
    DoNotTrack,
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Deliberately does not say which half of the pair is wrong
    #[error("Invalid project or tracking code")]
    InvalidProjectOrCode,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct EventIngestor {
    storage: Arc<dyn Storage>,
    geo: GeoResolver,
}

impl EventIngestor {
    pub fn new(storage: Arc<dyn Storage>, geo: GeoResolver) -> Self {
        Self { storage, geo }
    }

    /// Build and persist one event. Writes exactly once on `Tracked`, never otherwise.
    ///
    /// `request.ip_address` is expected to already hold the resolved client
    /// address (see `resolve_client_address`); it is never persisted.
    pub async fn ingest(&self, request: NewEvent) -> Result<IngestOutcome, IngestError> {
        let project = self
            .storage
            .find_project(
                &request.project_id,
                ProjectKey::TrackingCode(&request.tracking_code),
            )
            .await?
            .ok_or(IngestError::InvalidProjectOrCode)?;

        let address = request.ip_address.as_deref();
        let ip_digest = match privacy::evaluate(
            &project.privacy_settings,
            address,
            request.consent_given,
            request.do_not_track,
        ) {
            PrivacyDecision::Allow { ip_digest } => ip_digest,
            PrivacyDecision::ConsentRequired => {
                debug!(project_id = %project.id, "Dropping event without consent");
                return Ok(IngestOutcome::ConsentRequired);
            }
            PrivacyDecision::DoNotTrack => {
                debug!(project_id = %project.id, "Dropping event with Do-Not-Track set");
                return Ok(IngestOutcome::DoNotTrack);
            }
        };

        let location = self.geo.resolve(address);

        let event = Event {
            id: Uuid::new_v4(),
            project_id: project.id,
            session_id: request.session_id,
            event_type: request.event_type,
            event_name: request.event_name,
            page_url: request.page_url,
            page_title: request.page_title,
            referrer: request.referrer,
            user_agent: request.user_agent,
            properties: request.properties,
            country: location.country,
            continent: location.continent,
            ip_digest,
            timestamp: Utc::now(),
        };

        self.storage.insert_event(&event).await?;
        debug!(event_id = %event.id, project_id = %event.project_id, "Tracked event");

        Ok(IngestOutcome::Tracked(event.id))
    }
}
