//! Best-effort geo resolution chain
//!
//! Resolves an address to `(country, continent)` in three tiers, first
//! success wins:
//!
//! 1. the configured geo database, when present and the address parses
//! 2. a first-octet range table (country only)
//! 3. a digit-sum over the octets, modulo the continent list (continent only)
//!
//! Tiers 2 and 3 are demo-quality heuristics, not geolocation. They exist so
//! dashboards always have plausible data without a database. Every tier is
//! deterministic: the same address against the same database state always
//! yields the same pair. Nothing in this module returns an error.

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analytics::geoip::{GeoDatabase, GeoIpService};
use crate::config::AnalyticsConfig;

/// Continents in heuristic selection order
pub const CONTINENTS: [&str; 6] = [
    "North America",
    "Europe",
    "Asia",
    "South America",
    "Africa",
    "Oceania",
];

/// Contiguous, non-overlapping first-octet ranges. Octets outside every range are unknown.
const OCTET_COUNTRIES: [(u8, u8, &str); 7] = [
    (1, 24, "US"),
    (25, 49, "IN"),
    (50, 99, "EU"),
    (100, 127, "CN"),
    (128, 172, "JP"),
    (173, 191, "AU"),
    (192, 223, "BR"),
];

/// Resolved origin of an event; `None` means unknown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub continent: Option<String>,
}

/// Geo resolution chain over an optional database handle
#[derive(Clone, Default)]
pub struct GeoResolver {
    database: Option<Arc<dyn GeoDatabase>>,
}

impl GeoResolver {
    pub fn new(database: Option<Arc<dyn GeoDatabase>>) -> Self {
        Self { database }
    }

    /// Open the configured MaxMind database. An unreadable database is
    /// logged and the chain runs on heuristics alone.
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        let Some(path) = config.geoip_db_path.as_deref() else {
            info!("No GeoIP database configured, using heuristic geo resolution");
            return Self::default();
        };

        match GeoIpService::new(path) {
            Ok(service) => {
                info!("Loaded GeoIP database from {}", path);
                Self::new(Some(Arc::new(service)))
            }
            Err(e) => {
                warn!("GeoIP database unavailable, using heuristic geo resolution: {e:#}");
                Self::default()
            }
        }
    }

    /// Resolve an address, tolerating absent and malformed input
    pub fn resolve(&self, address: Option<&str>) -> GeoLocation {
        let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) else {
            return GeoLocation::default();
        };

        if let Some(location) = self.lookup_database(address) {
            return location;
        }

        GeoLocation {
            country: country_from_octets(address).map(str::to_string),
            continent: continent_from_digits(address).map(str::to_string),
        }
    }

    fn lookup_database(&self, address: &str) -> Option<GeoLocation> {
        let database = self.database.as_ref()?;

        let ip = match address.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                debug!(address, "Address is not an IP, skipping geo database");
                return None;
            }
        };

        match database.lookup(ip) {
            Ok(record) => {
                let continent = record
                    .continent
                    .or_else(|| continent_from_digits(address).map(str::to_string));
                Some(GeoLocation {
                    country: Some(record.country_code),
                    continent,
                })
            }
            Err(e) => {
                debug!(%ip, error = %e, "Geo database lookup unavailable, using heuristics");
                None
            }
        }
    }
}

/// Parse four dot-separated decimal octets
fn parse_octets(address: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = address.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

/// Country code selected by the first octet, or `None` when unknown
pub fn country_from_octets(address: &str) -> Option<&'static str> {
    let first = parse_octets(address.trim())?[0];
    OCTET_COUNTRIES
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&first))
        .map(|(_, _, country)| *country)
}

/// Continent selected by the digit sum of all octets, or `None` when malformed
pub fn continent_from_digits(address: &str) -> Option<&'static str> {
    let address = address.trim();
    parse_octets(address)?;

    let digit_sum: usize = address
        .bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| usize::from(b - b'0'))
        .sum();
    Some(CONTINENTS[digit_sum % CONTINENTS.len()])
}
