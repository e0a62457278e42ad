//! License activation business rules.
//!
//! The plugin API and the account API both funnel through these functions so
//! that domain normalization and quota enforcement behave identically on
//! every path. Business-rule failures (expired, limit reached) are returned
//! as [`RegisterOutcome`] variants, never as errors: plugin clients branch on
//! the `status` field of a 200 response.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries::{self, ActivationOutcome};
use crate::error::Result;
use crate::util::{normalize_domain, redact_key};

/// Typed outcome of an activate/deactivate/check operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// Unknown license key
    Invalid,
    /// License soft-deleted (subscription canceled)
    Canceled,
    Expired {
        expires_at: i64,
    },
    /// License exists but is not active, or the caller asked about a license
    /// that holds no activation here. Also the blanket answer for deactivate,
    /// which never discloses whether the key exists.
    Inactive {
        expires_at: Option<i64>,
    },
    /// Check only: license is live but this domain holds no slot
    NotActivated {
        expires_at: i64,
        activated_domains: Vec<String>,
        max_domains: i32,
    },
    LimitReached {
        expires_at: i64,
        activated_domains: Vec<String>,
        max_domains: i32,
    },
    Active {
        expires_at: i64,
        activated_domains: Vec<String>,
        max_domains: i32,
    },
}

/// Activate a license on a domain.
///
/// Re-activating an already-activated domain is an idempotent success: no new
/// activation row, no counter bump. The quota check runs again inside the
/// activation transaction, so two racing requests cannot both take the last
/// slot.
pub fn activate(
    conn: &mut Connection,
    license_key: &str,
    site_url: &str,
    ip_address: Option<&str>,
    source: &str,
) -> Result<RegisterOutcome> {
    let Some(license) = queries::get_license_by_key(conn, license_key)? else {
        return Ok(RegisterOutcome::Invalid);
    };

    let now = Utc::now().timestamp();
    if license.is_deleted() {
        return Ok(RegisterOutcome::Canceled);
    }
    if license.is_expired(now) {
        return Ok(RegisterOutcome::Expired {
            expires_at: license.expires_at,
        });
    }
    if !license.active {
        return Ok(RegisterOutcome::Inactive {
            expires_at: Some(license.expires_at),
        });
    }

    let domain = normalize_domain(site_url);
    let outcome = queries::activate_domain_atomic(
        conn,
        &license.id,
        &domain,
        license.max_domains,
        ip_address,
        source,
    )?;

    Ok(match outcome {
        ActivationOutcome::AlreadyActive { activated_domains }
        | ActivationOutcome::Activated { activated_domains } => {
            tracing::info!(
                "Activated license {} on {} (expires {})",
                redact_key(license_key),
                domain,
                license.expires_at
            );
            RegisterOutcome::Active {
                expires_at: license.expires_at,
                activated_domains,
                max_domains: license.max_domains,
            }
        }
        ActivationOutcome::LimitReached { activated_domains } => RegisterOutcome::LimitReached {
            expires_at: license.expires_at,
            activated_domains,
            max_domains: license.max_domains,
        },
    })
}

/// Deactivate a license on a domain. Always succeeds with an "inactive"
/// outcome, even for unknown keys or domains that were never activated, so
/// unauthenticated callers cannot probe which license keys exist.
pub fn deactivate(
    conn: &mut Connection,
    license_key: &str,
    site_url: &str,
    ip_address: Option<&str>,
    source: &str,
) -> Result<RegisterOutcome> {
    let Some(license) = queries::get_license_by_key(conn, license_key)? else {
        return Ok(RegisterOutcome::Inactive { expires_at: None });
    };

    let domain = normalize_domain(site_url);
    let (removed, _remaining) =
        queries::deactivate_domain(conn, &license.id, &domain, ip_address, source)?;
    if removed {
        tracing::info!(
            "Deactivated license {} on {}",
            redact_key(license_key),
            domain
        );
    }

    Ok(RegisterOutcome::Inactive { expires_at: None })
}

/// Read-only status query for a (license, domain) pair.
pub fn check(conn: &Connection, license_key: &str, site_url: &str) -> Result<RegisterOutcome> {
    let Some(license) = queries::get_license_by_key(conn, license_key)? else {
        return Ok(RegisterOutcome::Inactive { expires_at: None });
    };

    let now = Utc::now().timestamp();
    let activated_domains = queries::activated_domains(conn, &license.id)?;

    if license.is_valid(now) {
        let domain = normalize_domain(site_url);
        let activated_here = activated_domains
            .iter()
            .any(|d| normalize_domain(d) == domain);
        if activated_here {
            Ok(RegisterOutcome::Active {
                expires_at: license.expires_at,
                activated_domains,
                max_domains: license.max_domains,
            })
        } else {
            Ok(RegisterOutcome::NotActivated {
                expires_at: license.expires_at,
                activated_domains,
                max_domains: license.max_domains,
            })
        }
    } else if license.is_expired(now) {
        Ok(RegisterOutcome::Expired {
            expires_at: license.expires_at,
        })
    } else {
        Ok(RegisterOutcome::Inactive {
            expires_at: Some(license.expires_at),
        })
    }
}
