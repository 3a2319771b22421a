//! Consent enforcement and address anonymization

use sha2::{Digest, Sha256};

use crate::models::PrivacySettings;

/// Hex characters kept from the address digest
pub const DIGEST_LEN: usize = 16;

/// Outcome of the privacy gate for one tracking request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivacyDecision {
    /// Persist the event with this (optional) address digest
    Allow { ip_digest: Option<String> },
    /// The project requires consent and the caller did not assert it
    ConsentRequired,
    /// The project honours Do-Not-Track and the request set it
    DoNotTrack,
}

/// Apply a project's privacy settings to a request. The raw address is never
/// part of the decision's output.
pub fn evaluate(
    settings: &PrivacySettings,
    address: Option<&str>,
    consent_given: bool,
    do_not_track: bool,
) -> PrivacyDecision {
    if settings.require_consent && !consent_given {
        return PrivacyDecision::ConsentRequired;
    }

    if settings.respect_dnt && do_not_track {
        return PrivacyDecision::DoNotTrack;
    }

    let ip_digest = if settings.anonymize_ip {
        address.filter(|a| !a.is_empty()).map(digest_address)
    } else {
        None
    };

    PrivacyDecision::Allow { ip_digest }
}

/// Truncated SHA-256 of the address, lowercase hex
pub fn digest_address(address: &str) -> String {
    let hash = Sha256::digest(address.as_bytes());
    let mut hex = format!("{:x}", hash);
    hex.truncate(DIGEST_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(anonymize_ip: bool, require_consent: bool) -> PrivacySettings {
        PrivacySettings {
            anonymize_ip,
            require_consent,
            respect_dnt: true,
        }
    }

    #[test]
    fn test_consent_required_without_consent() {
        let decision = evaluate(&settings(true, true), Some("203.0.113.7"), false, false);
        assert_eq!(decision, PrivacyDecision::ConsentRequired);
    }

    #[test]
    fn test_do_not_track_is_honoured() {
        let decision = evaluate(&settings(true, false), Some("203.0.113.7"), false, true);
        assert_eq!(decision, PrivacyDecision::DoNotTrack);

        let mut ignore_dnt = settings(true, false);
        ignore_dnt.respect_dnt = false;
        let decision = evaluate(&ignore_dnt, Some("203.0.113.7"), false, true);
        assert!(matches!(decision, PrivacyDecision::Allow { .. }));
    }

    #[test]
    fn test_anonymized_digest_hides_address() {
        let decision = evaluate(&settings(true, true), Some("203.0.113.7"), true, false);
        let PrivacyDecision::Allow { ip_digest: Some(digest) } = decision else {
            panic!("expected a digest, got {decision:?}");
        };

        assert_eq!(digest.len(), DIGEST_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!digest.contains("203.0.113.7"));
        assert_eq!(digest, digest_address("203.0.113.7"));
    }

    #[test]
    fn test_anonymization_disabled_stores_nothing() {
        let decision = evaluate(&settings(false, false), Some("203.0.113.7"), false, false);
        assert_eq!(decision, PrivacyDecision::Allow { ip_digest: None });
    }

    #[test]
    fn test_missing_address_has_no_digest() {
        let decision = evaluate(&settings(true, false), None, false, false);
        assert_eq!(decision, PrivacyDecision::Allow { ip_digest: None });
    }

    #[test]
    fn test_known_digest_value() {
        // sha256("127.0.0.1") = 12ca17b49af22894...
        assert_eq!(digest_address("127.0.0.1"), "12ca17b49af22894");
    }
}
