//! Client address resolution from request metadata with trust validation
//!
//! This module implements client address extraction that:
//! - Prefers an explicit address hint supplied by the tracking snippet
//! - Validates trust chains for X-Forwarded-For and Forwarded headers
//! - Supports vendor-specific headers (e.g., CF-Connecting-IP)
//! - Falls back to socket remote address when headers are untrusted
//!
//! The result is textual on purpose: a hint may be malformed, and the
//! geo resolution chain is responsible for coping with that.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Resolve the client address for an incoming tracking request
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `socket_addr` - The socket remote address (fallback), if known
/// * `hint` - Address supplied in the request body; wins when non-empty
/// * `config` - Analytics configuration with trust settings
pub fn resolve_client_address(
    headers: &HeaderMap,
    socket_addr: Option<IpAddr>,
    hint: Option<&str>,
    config: &AnalyticsConfig,
) -> Option<String> {
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        return Some(hint.to_string());
    }

    extract_client_ip(headers, socket_addr, config).map(|ip| ip.to_string())
}

/// Extract the client IP address from HTTP headers
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: Option<IpAddr>,
    config: &AnalyticsConfig,
) -> Option<IpAddr> {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

/// Whether the request asked not to be tracked (`DNT: 1`)
pub fn do_not_track(headers: &HeaderMap) -> bool {
    headers
        .get("dnt")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.trim() == "1")
}

/// Extract IP from Cloudflare-specific header
fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Extract IP from standard headers (Forwarded, X-Forwarded-For) with trust validation
fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    // Prefer RFC 7239 Forwarded header
    let forwarded = extract_from_forwarded(headers);
    if !forwarded.is_empty() {
        return select_untrusted(&forwarded, config);
    }

    let xff = extract_from_x_forwarded_for(headers);
    if xff.is_empty() {
        return None;
    }
    select_untrusted(&xff, config)
}

/// Collect the `for=` addresses of an RFC 7239 Forwarded header, in hop order
fn extract_from_forwarded(headers: &HeaderMap) -> Vec<IpAddr> {
    let Some(forwarded) = headers.get("forwarded").and_then(|h| h.to_str().ok()) else {
        return Vec::new();
    };

    // Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for="[2001:db8::1]:4711"
    forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let value = param.trim();
                let value = value
                    .strip_prefix("for=")
                    .or_else(|| value.strip_prefix("For="))?;
                parse_forwarded_node(value.trim_matches('"'))
            })
        })
        .collect()
}

/// Parse a Forwarded node, dropping brackets and ports
fn parse_forwarded_node(node: &str) -> Option<IpAddr> {
    if let Some(rest) = node.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    node.rsplit_once(':')
        .and_then(|(host, _port)| host.parse::<IpAddr>().ok())
}

fn extract_from_x_forwarded_for(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .map(|xff| {
            xff.split(',')
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Walk the hop chain right to left and return the first address not vouched for
fn select_untrusted(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    // If num_trusted_proxies is specified, skip that many from the right
    if let Some(num_trusted) = config.num_trusted_proxies {
        if chain.len() > num_trusted {
            return Some(chain[chain.len() - num_trusted - 1]);
        }
        // Not enough hops in the chain, return the leftmost (least trusted)
        return chain.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !config.trusted_proxies.iter().any(|net| net.contains(*ip)))
            .or_else(|| chain.first())
            .copied();
    }

    // No trust configuration, return the rightmost IP
    chain.last().copied()
}
