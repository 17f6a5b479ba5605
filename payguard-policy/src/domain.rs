//! Vendor domain extraction and matching.

/// Extracts the registered domain from a vendor URL.
///
/// Accepts full URLs (`https://pay.vendor.example/invoice`) as well as bare
/// hosts (`vendor.example`). Returns the lowercased host with any port and
/// userinfo stripped, or `None` when nothing host-like is present.
#[must_use]
pub fn registered_domain(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }

    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or_default();

    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// Returns `true` when `domain` matches an entry in `set`.
///
/// Matching is case-insensitive and suffix-based on label boundaries, so the
/// entry `vendor.example` covers both `vendor.example` and
/// `pay.vendor.example` but not `evilvendor.example`.
#[must_use]
pub fn matches_domain_set<S: AsRef<str>>(domain: &str, set: &[S]) -> bool {
    let domain = domain.to_ascii_lowercase();
    set.iter().any(|entry| {
        let entry = entry.as_ref().to_ascii_lowercase();
        domain == entry || domain.ends_with(&format!(".{entry}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_url_forms() {
        assert_eq!(
            registered_domain("https://pay.vendor.example/invoice?id=1"),
            Some("pay.vendor.example".to_owned())
        );
        assert_eq!(
            registered_domain("vendor.example:8443"),
            Some("vendor.example".to_owned())
        );
        assert_eq!(
            registered_domain("https://user@Vendor.Example"),
            Some("vendor.example".to_owned())
        );
        assert_eq!(registered_domain("   "), None);
        assert_eq!(registered_domain("https://"), None);
    }

    #[test]
    fn suffix_matching_respects_label_boundaries() {
        let set = ["vendor.example".to_owned()];
        assert!(matches_domain_set("vendor.example", &set));
        assert!(matches_domain_set("pay.vendor.example", &set));
        assert!(matches_domain_set("PAY.VENDOR.EXAMPLE", &set));
        assert!(!matches_domain_set("evilvendor.example", &set));
        assert!(!matches_domain_set("vendor.example.evil", &set));
    }
}
