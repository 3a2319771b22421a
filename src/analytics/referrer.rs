//! Referrer categorization into provider buckets

pub const DIRECT: &str = "Direct";

/// Substring rules, checked in order against the lowercased referrer
const PROVIDERS: [(&[&str], &str); 9] = [
    (&["mail.google."], "Gmail"),
    (&["outlook.live.", "outlook.office", "hotmail.", "outlook.com"], "Outlook"),
    (&["mail.yahoo."], "Yahoo Mail"),
    (&["facebook.com", "//fb.com/", "//fb.me/", "//m.facebook."], "Facebook"),
    (&["twitter.com", "//t.co/", "//x.com/"], "Twitter"),
    (&["linkedin.com", "//lnkd.in/"], "LinkedIn"),
    (&["google."], "Google"),
    (&["bing.com"], "Bing"),
    (&["duckduckgo.com"], "DuckDuckGo"),
];

const DIRECT_ALIASES: [&str; 4] = ["direct", "(direct)", "none", "(none)"];

/// Map a raw referrer to a provider label. Total and deterministic.
pub fn categorize(referrer: Option<&str>) -> String {
    let raw = referrer.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return DIRECT.to_string();
    }

    let lower = raw.to_lowercase();
    if DIRECT_ALIASES.contains(&lower.as_str()) {
        return DIRECT.to_string();
    }

    // Trailing slash lets host-only rules like "//t.co/" match bare origins
    let haystack = format!("{lower}/");
    for (needles, label) in PROVIDERS {
        if needles.iter().any(|needle| haystack.contains(needle)) {
            return label.to_string();
        }
    }

    match extract_host(raw) {
        Some(host) => host.to_string(),
        None => raw.to_string(),
    }
}

/// Host portion of a URL-ish string: no scheme, no leading `www.`, nothing after the first `/`
fn extract_host(raw: &str) -> Option<&str> {
    let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    let host = without_www.split('/').next()?;

    (!host.is_empty()).then_some(host)
}
