//! Subscription-to-license synchronization.
//!
//! The billing webhook is the single writer of the subscription→license
//! relationship: license `expires_at` always mirrors the subscription's
//! paid-through date, and `active`/`deleted_at` follow the subscription
//! lifecycle. The routine is idempotent; re-running it with unchanged
//! subscription state produces no new activity rows.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{LicenseActivityType, NewLicenseActivity, SubscriptionStatus};

#[derive(Debug, Default, PartialEq)]
pub struct SyncReport {
    pub linked: usize,
    pub updated: usize,
    pub auto_deactivated: usize,
}

/// Reconcile all licenses of a subscription with the subscription's state.
///
/// - Links unlinked licenses of the same organization (first-time checkout
///   race where the license exists before the subscription record).
/// - Sets `expires_at = period_ends_at` and `active` from the subscription.
/// - Soft-deletes on cancel, restores on reactivation.
/// - On pause or cancel, removes the domain activations and logs
///   AUTO_DEACTIVATE activities for every domain that held a slot.
pub fn sync_license_from_subscription(
    conn: &mut Connection,
    subscription_id: &str,
) -> Result<SyncReport> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let Some(subscription) = queries::get_subscription(&tx, subscription_id)? else {
        tracing::warn!("Subscription {} not found, skipping license sync", subscription_id);
        return Ok(SyncReport::default());
    };

    let should_be_active =
        subscription.active && subscription.status == SubscriptionStatus::Active;
    let should_be_deleted =
        !subscription.active && subscription.status == SubscriptionStatus::Canceled;
    let is_paused = subscription.status == SubscriptionStatus::Paused;

    let deactivation_reason = if should_be_deleted {
        Some("subscription_canceled")
    } else if is_paused {
        Some("subscription_paused")
    } else {
        None
    };

    // Capture affected licenses before their activations are cleared
    let affected = if deactivation_reason.is_some() {
        queries::licenses_with_activations_for_sync(
            &tx,
            subscription_id,
            &subscription.organization_id,
        )?
    } else {
        Vec::new()
    };

    let deleted_at = if should_be_deleted {
        Some(chrono::Utc::now().timestamp())
    } else {
        None
    };

    let linked = queries::link_unlinked_licenses(
        &tx,
        &subscription.organization_id,
        subscription_id,
        subscription.period_ends_at,
        should_be_active,
        deleted_at,
    )?;
    if linked > 0 {
        tracing::info!(
            "Linked {} license(s) to subscription {}",
            linked,
            subscription_id
        );
    }

    let updated = queries::sync_linked_licenses(
        &tx,
        subscription_id,
        subscription.period_ends_at,
        should_be_active,
        deleted_at,
    )?;

    let mut auto_deactivated = 0;
    if let Some(reason) = deactivation_reason {
        queries::clear_activations_for_subscription(&tx, subscription_id)?;

        let mut activities = Vec::new();
        for (license_id, domains) in &affected {
            for domain in domains {
                activities.push(NewLicenseActivity {
                    license_id: license_id.clone(),
                    action_type: LicenseActivityType::AutoDeactivate,
                    domain: Some(domain.clone()),
                    ip_address: None,
                    metadata: Some(serde_json::json!({
                        "reason": reason,
                        "subscription_id": subscription_id,
                    })),
                });
            }
        }
        auto_deactivated = activities.len();
        queries::insert_license_activities(&tx, &activities)?;
    }

    tx.commit()?;

    if should_be_deleted {
        tracing::info!(
            "Soft deleted {} license(s) for canceled subscription {}",
            updated,
            subscription_id
        );
    } else if is_paused {
        tracing::info!(
            "Paused {} license(s) for subscription {}",
            updated,
            subscription_id
        );
    } else {
        tracing::info!(
            "Synced {} license(s) for subscription {}: active={}, expires_at={}",
            updated,
            subscription_id,
            should_be_active,
            subscription.period_ends_at
        );
    }

    Ok(SyncReport {
        linked,
        updated,
        auto_deactivated,
    })
}
