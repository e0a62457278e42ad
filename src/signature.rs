//! HMAC verification for WordPress plugin requests.
//!
//! The plugin signs every request with a shared secret:
//! `HMAC-SHA256(secret, "{site_url}:{timestamp}:{body}")`, hex-encoded in the
//! `X-Plugin-Signature` header alongside `X-Site-URL` and `X-Timestamp`.

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::Organization;
use crate::util::normalize_site_url;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed clock skew between plugin and server, in seconds.
const MAX_TIMESTAMP_SKEW: i64 = 300;

/// Successful verification. `organization` is populated only when the caller
/// requested tenant resolution.
#[derive(Debug, Clone)]
pub struct VerifiedPlugin {
    /// Site URL from the header, trailing slash stripped
    pub site_url: String,
    pub organization: Option<Organization>,
}

/// Verify the plugin signature headers against the raw request body.
///
/// Failure modes map onto the plugin API's error taxonomy: missing headers and
/// stale timestamps are 401, a signature mismatch is 403. The expected
/// signature is never included in errors or logs.
pub fn verify_plugin_signature(
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<VerifiedPlugin> {
    if secret.is_empty() {
        tracing::error!("PLUGIN_SECRET_KEY not configured");
        return Err(AppError::Internal("Plugin secret not configured".into()));
    }

    let signature = headers
        .get("X-Plugin-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Plugin-Signature header".into()))?;
    let site_url = headers
        .get("X-Site-URL")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Site-URL header".into()))?;
    let timestamp = headers
        .get("X-Timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Timestamp header".into()))?;

    // Reject requests outside the replay window
    let request_time: i64 = timestamp
        .parse()
        .map_err(|_| AppError::Unauthorized("Invalid X-Timestamp header".into()))?;
    let now = Utc::now().timestamp();
    if (now - request_time).abs() > MAX_TIMESTAMP_SKEW {
        return Err(AppError::Unauthorized("Request timestamp expired".into()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid plugin secret".into()))?;
    mac.update(site_url.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
        tracing::warn!("Invalid plugin signature from site: {}", site_url);
        return Err(AppError::Forbidden("Invalid signature".into()));
    }

    Ok(VerifiedPlugin {
        site_url: normalize_site_url(site_url),
        organization: None,
    })
}

/// Verify the signature and additionally resolve the calling organization by
/// its registered site URL. Endpoints that need tenant context use this.
pub fn verify_plugin_signature_with_org(
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
    conn: &rusqlite::Connection,
) -> Result<VerifiedPlugin> {
    let mut verified = verify_plugin_signature(secret, headers, body)?;

    let organization = queries::get_organization_by_site_url(conn, &verified.site_url)?;
    let Some(organization) = organization else {
        tracing::warn!("No organization found for site URL: {}", verified.site_url);
        return Err(AppError::NotFound("Site not registered".into()));
    };

    verified.organization = Some(organization);
    Ok(verified)
}

/// Compute a signature the way the plugin does. Used by tests and dev tooling.
pub fn sign_plugin_request(secret: &str, site_url: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(site_url.as_bytes());
    mac.update(b":");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b":");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed_headers(secret: &str, site_url: &str, timestamp: i64, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Plugin-Signature",
            HeaderValue::from_str(&sign_plugin_request(secret, site_url, timestamp, body)).unwrap(),
        );
        headers.insert("X-Site-URL", HeaderValue::from_str(site_url).unwrap());
        headers.insert(
            "X-Timestamp",
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"action":"check"}"#;
        let now = Utc::now().timestamp();
        let headers = signed_headers("secret", "https://example.com/", now, body);

        let verified = verify_plugin_signature("secret", &headers, body).unwrap();
        assert_eq!(verified.site_url, "https://example.com");
        assert!(verified.organization.is_none());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        let err = verify_plugin_signature("secret", &headers, b"{}").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn stale_timestamp_is_unauthorized() {
        let body = b"{}";
        let stale = Utc::now().timestamp() - MAX_TIMESTAMP_SKEW - 10;
        let headers = signed_headers("secret", "https://example.com", stale, body);

        let err = verify_plugin_signature("secret", &headers, body).unwrap_err();
        match err {
            AppError::Unauthorized(msg) => assert!(msg.contains("expired")),
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn wrong_secret_is_forbidden() {
        let body = b"{}";
        let now = Utc::now().timestamp();
        let headers = signed_headers("other-secret", "https://example.com", now, body);

        let err = verify_plugin_signature("secret", &headers, body).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn tampered_body_is_forbidden() {
        let now = Utc::now().timestamp();
        let headers = signed_headers("secret", "https://example.com", now, b"{\"a\":1}");

        let err = verify_plugin_signature("secret", &headers, b"{\"a\":2}").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
