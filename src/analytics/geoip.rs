//! GeoIP lookup service using MaxMind GeoLite2/GeoIP2 MMDB
//!
//! This is the primary tier of the geo resolution chain. The reader is
//! memory-mapped once at startup and shared read-only across requests.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// Country and continent reported by a geo database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRecord {
    pub country_code: String,
    pub continent: Option<String>,
}

#[derive(Debug, Error)]
pub enum GeoLookupError {
    #[error("no geo record for {0}")]
    NotFound(IpAddr),
    #[error("geo database lookup failed: {0}")]
    Database(String),
}

/// Address-keyed geo database
pub trait GeoDatabase: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<GeoRecord, GeoLookupError>;
}

/// MaxMind-backed geo database; accepts Country or City editions
pub struct GeoIpService {
    reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open a memory-mapped MMDB file
    pub fn new(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP database at {}", path))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

impl GeoDatabase for GeoIpService {
    fn lookup(&self, ip: IpAddr) -> Result<GeoRecord, GeoLookupError> {
        let result = self
            .reader
            .lookup(ip)
            .map_err(|e| GeoLookupError::Database(e.to_string()))?;

        // The City edition is a superset of Country, so Country decoding covers both
        let country = result
            .decode::<geoip2::Country>()
            .map_err(|e| GeoLookupError::Database(e.to_string()))?
            .ok_or(GeoLookupError::NotFound(ip))?;

        let country_code = country
            .country
            .iso_code
            .map(|s| s.to_string())
            .ok_or(GeoLookupError::NotFound(ip))?;

        Ok(GeoRecord {
            country_code,
            continent: country.continent.names.english.map(|s| s.to_string()),
        })
    }
}

// Implement Clone by cloning the Arc
impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
