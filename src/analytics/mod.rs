//! Event ingestion and aggregation pipeline
//!
//! Incoming events pass through address resolution, the privacy gate and the
//! geo chain before they are stored. Rollups, CSV exports and question
//! answers are all computed on demand from the stored events.

pub mod aggregator;
pub mod answer;
pub mod assistant;
pub mod export;
pub mod geo;
pub mod geoip;
pub mod ingest;
pub mod ip_extractor;
pub mod models;
pub mod privacy;
pub mod referrer;
pub mod user_agent;

pub use aggregator::AggregationEngine;
pub use answer::{Answer, AnswerGenerator, AnswerService};
pub use assistant::HttpAssistant;
pub use export::{ExportDocument, ReportExporter};
pub use geo::{GeoLocation, GeoResolver};
pub use geoip::GeoIpService;
pub use ingest::{EventIngestor, IngestError, IngestOutcome};
pub use ip_extractor::{do_not_track, resolve_client_address};
pub use models::RollupResult;
