//! Shared utility functions for the Depositdesk application.

use axum::http::HeaderMap;

/// Normalize a domain or site URL for comparison and storage.
///
/// Strips the scheme, a leading `www.`, and a trailing slash, then lowercases.
/// Must be applied identically on write and read paths: activations are matched
/// by normalized domain, so `https://www.Example.com/` and `example.com` occupy
/// the same slot.
pub fn normalize_domain(domain: &str) -> String {
    let d = domain.trim();
    let d = d
        .strip_prefix("https://")
        .or_else(|| d.strip_prefix("http://"))
        .unwrap_or(d);
    let d = d.strip_prefix("www.").unwrap_or(d);
    let d = d.strip_suffix('/').unwrap_or(d);
    d.to_lowercase()
}

/// Strip only a trailing slash from a site URL, preserving the scheme.
/// Used for organization lookup, which stores full site URLs.
pub fn normalize_site_url(site_url: &str) -> String {
    site_url.trim().trim_end_matches('/').to_string()
}

/// Extract the client IP from proxy headers.
///
/// Tries `x-forwarded-for` first (taking the first hop), then `x-real-ip`.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Redact a license key for log output, keeping only a short prefix.
pub fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_scheme_www_slash_and_case() {
        let variants = [
            "example.com",
            "EXAMPLE.COM",
            "https://example.com",
            "http://example.com",
            "https://www.example.com",
            "www.example.com/",
            "https://WWW.Example.Com/",
        ];
        for v in variants {
            assert_eq!(normalize_domain(v), "example.com", "variant: {}", v);
        }
    }

    #[test]
    fn normalize_keeps_subdomains_and_paths_distinct() {
        assert_eq!(normalize_domain("shop.example.com"), "shop.example.com");
        assert_ne!(
            normalize_domain("example.com/store"),
            normalize_domain("example.com")
        );
    }

    #[test]
    fn site_url_normalization_keeps_scheme() {
        assert_eq!(
            normalize_site_url("https://example.com/"),
            "https://example.com"
        );
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn redacted_key_hides_tail() {
        let redacted = redact_key("dd_1234567890abcdef");
        assert_eq!(redacted, "dd_12345...");
        assert!(!redacted.contains("abcdef"));
    }
}
