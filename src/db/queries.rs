use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::util::normalize_domain;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a license key: `dd_` prefix plus 32 hex chars of randomness.
pub fn generate_license_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("dd_{}", hex::encode(bytes))
}

/// Generate an opaque session token.
pub fn generate_session_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============ Row mapping ============

const LICENSE_COLS: &str = "id, license_key, organization_id, max_domains, activation_count, \
     active, expires_at, deleted_at, subscription_id, created_at, updated_at";

fn license_from_row(row: &Row) -> rusqlite::Result<License> {
    Ok(License {
        id: row.get(0)?,
        license_key: row.get(1)?,
        organization_id: row.get(2)?,
        max_domains: row.get(3)?,
        activation_count: row.get(4)?,
        active: row.get(5)?,
        expires_at: row.get(6)?,
        deleted_at: row.get(7)?,
        subscription_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const ACTIVATION_COLS: &str = "id, license_id, domain, activated_at, ip_address";

fn activation_from_row(row: &Row) -> rusqlite::Result<DomainActivation> {
    Ok(DomainActivation {
        id: row.get(0)?,
        license_id: row.get(1)?,
        domain: row.get(2)?,
        activated_at: row.get(3)?,
        ip_address: row.get(4)?,
    })
}

const SUBSCRIPTION_COLS: &str =
    "id, organization_id, status, active, period_ends_at, created_at, updated_at";

fn subscription_from_row(row: &Row) -> rusqlite::Result<Subscription> {
    let status: String = row.get(2)?;
    Ok(Subscription {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        status: status
            .parse()
            .unwrap_or(SubscriptionStatus::Canceled),
        active: row.get(3)?,
        period_ends_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const TICKET_COLS: &str = "id, ticket_number, organization_id, user_id, subject, priority, \
     status, created_at, updated_at";

fn ticket_from_row(row: &Row) -> rusqlite::Result<SupportTicket> {
    let priority: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(SupportTicket {
        id: row.get(0)?,
        ticket_number: row.get(1)?,
        organization_id: row.get(2)?,
        user_id: row.get(3)?,
        subject: row.get(4)?,
        priority: priority.parse().unwrap_or(TicketPriority::Medium),
        status: status.parse().unwrap_or(TicketStatus::Open),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const MESSAGE_COLS: &str = "id, ticket_id, user_id, is_staff, message, message_id, created_at";

fn message_from_row(row: &Row) -> rusqlite::Result<TicketMessage> {
    Ok(TicketMessage {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        user_id: row.get(2)?,
        is_staff: row.get(3)?,
        message: row.get(4)?,
        message_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

// ============ Organizations / users / sessions ============

pub fn create_organization(
    conn: &Connection,
    name: &str,
    site_url: Option<&str>,
) -> Result<Organization> {
    let id = gen_id();
    let now = now();
    let site_url = site_url.map(|s| s.trim_end_matches('/').to_string());
    conn.execute(
        "INSERT INTO organizations (id, name, site_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, name, &site_url, now, now],
    )?;
    Ok(Organization {
        id,
        name: name.to_string(),
        site_url,
        billing_customer_id: None,
        stripe_account_id: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_organization_by_site_url(
    conn: &Connection,
    site_url: &str,
) -> Result<Option<Organization>> {
    conn.query_row(
        "SELECT id, name, site_url, billing_customer_id, stripe_account_id, created_at, updated_at
         FROM organizations WHERE site_url = ?1",
        params![site_url],
        |row| {
            Ok(Organization {
                id: row.get(0)?,
                name: row.get(1)?,
                site_url: row.get(2)?,
                billing_customer_id: row.get(3)?,
                stripe_account_id: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_organization_by_billing_customer_id(
    conn: &Connection,
    billing_customer_id: &str,
) -> Result<Option<Organization>> {
    conn.query_row(
        "SELECT id, name, site_url, billing_customer_id, stripe_account_id, created_at, updated_at
         FROM organizations WHERE billing_customer_id = ?1",
        params![billing_customer_id],
        |row| {
            Ok(Organization {
                id: row.get(0)?,
                name: row.get(1)?,
                site_url: row.get(2)?,
                billing_customer_id: row.get(3)?,
                stripe_account_id: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_organization_by_id(conn: &Connection, id: &str) -> Result<Option<Organization>> {
    conn.query_row(
        "SELECT id, name, site_url, billing_customer_id, stripe_account_id, created_at, updated_at
         FROM organizations WHERE id = ?1",
        params![id],
        |row| {
            Ok(Organization {
                id: row.get(0)?,
                name: row.get(1)?,
                site_url: row.get(2)?,
                billing_customer_id: row.get(3)?,
                stripe_account_id: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn create_user(
    conn: &Connection,
    organization_id: &str,
    email: &str,
    name: Option<&str>,
) -> Result<User> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO users (id, organization_id, email, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, organization_id, email, name, now, now],
    )?;
    Ok(User {
        id,
        organization_id: organization_id.to_string(),
        email: email.to_string(),
        name: name.map(String::from),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, organization_id, email, name, created_at, updated_at
         FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                organization_id: row.get(1)?,
                email: row.get(2)?,
                name: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn create_session(conn: &Connection, user_id: &str, ttl_secs: i64) -> Result<Session> {
    let id = gen_id();
    let token = generate_session_token();
    let now = now();
    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, user_id, &token, now + ttl_secs, now],
    )?;
    Ok(Session {
        id,
        user_id: user_id.to_string(),
        token,
        expires_at: now + ttl_secs,
        created_at: now,
    })
}

/// Resolve a session token to its (non-expired) user.
pub fn get_user_by_session_token(conn: &Connection, token: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT u.id, u.organization_id, u.email, u.name, u.created_at, u.updated_at
         FROM sessions s JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > ?2",
        params![token, now()],
        |row| {
            Ok(User {
                id: row.get(0)?,
                organization_id: row.get(1)?,
                email: row.get(2)?,
                name: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

// ============ Licenses ============

pub struct CreateLicense<'a> {
    pub organization_id: &'a str,
    pub max_domains: i32,
    pub expires_at: i64,
    pub subscription_id: Option<&'a str>,
}

pub fn create_license(conn: &Connection, input: &CreateLicense) -> Result<License> {
    let id = gen_id();
    let key = generate_license_key();
    let now = now();
    conn.execute(
        "INSERT INTO licenses (id, license_key, organization_id, max_domains, activation_count,
                               active, expires_at, subscription_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &key,
            input.organization_id,
            input.max_domains,
            input.expires_at,
            input.subscription_id,
            now,
            now
        ],
    )?;
    Ok(License {
        id,
        license_key: key,
        organization_id: input.organization_id.to_string(),
        max_domains: input.max_domains,
        activation_count: 0,
        active: true,
        expires_at: input.expires_at,
        deleted_at: None,
        subscription_id: input.subscription_id.map(String::from),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    conn.query_row(
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        params![license_key],
        license_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    conn.query_row(
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        params![id],
        license_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// First license of an organization (the account portal assumes one per org).
pub fn get_license_for_organization(
    conn: &Connection,
    organization_id: &str,
) -> Result<Option<License>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM licenses WHERE organization_id = ?1 ORDER BY created_at ASC LIMIT 1",
            LICENSE_COLS
        ),
        params![organization_id],
        license_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_activations(conn: &Connection, license_id: &str) -> Result<Vec<DomainActivation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM license_domain_activations WHERE license_id = ?1 \
         ORDER BY activated_at DESC",
        ACTIVATION_COLS
    ))?;
    let rows = stmt.query_map(params![license_id], activation_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn activated_domains(conn: &Connection, license_id: &str) -> Result<Vec<String>> {
    Ok(list_activations(conn, license_id)?
        .into_iter()
        .map(|a| a.domain)
        .collect())
}

/// Find the activation covering a normalized domain, anywhere in the system,
/// together with its license. Used by the payment proxy for fee lookup.
pub fn find_activation_with_license(
    conn: &Connection,
    normalized_domain: &str,
) -> Result<Option<(DomainActivation, License)>> {
    conn.query_row(
        "SELECT a.id, a.license_id, a.domain, a.activated_at, a.ip_address,
                l.id, l.license_key, l.organization_id, l.max_domains, l.activation_count,
                l.active, l.expires_at, l.deleted_at, l.subscription_id, l.created_at, l.updated_at
         FROM license_domain_activations a
         JOIN licenses l ON l.id = a.license_id
         WHERE a.domain = ?1
         ORDER BY a.activated_at DESC LIMIT 1",
        params![normalized_domain],
        |row| {
            let activation = DomainActivation {
                id: row.get(0)?,
                license_id: row.get(1)?,
                domain: row.get(2)?,
                activated_at: row.get(3)?,
                ip_address: row.get(4)?,
            };
            let license = License {
                id: row.get(5)?,
                license_key: row.get(6)?,
                organization_id: row.get(7)?,
                max_domains: row.get(8)?,
                activation_count: row.get(9)?,
                active: row.get(10)?,
                expires_at: row.get(11)?,
                deleted_at: row.get(12)?,
                subscription_id: row.get(13)?,
                created_at: row.get(14)?,
                updated_at: row.get(15)?,
            };
            Ok((activation, license))
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn insert_license_activity(conn: &Connection, activity: &NewLicenseActivity) -> Result<()> {
    let metadata = activity
        .metadata
        .as_ref()
        .map(|m| m.to_string());
    conn.execute(
        "INSERT INTO license_activities (id, license_id, action_type, domain, ip_address, metadata, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            gen_id(),
            &activity.license_id,
            activity.action_type.as_ref(),
            &activity.domain,
            &activity.ip_address,
            metadata,
            now()
        ],
    )?;
    Ok(())
}

pub fn insert_license_activities(
    conn: &Connection,
    activities: &[NewLicenseActivity],
) -> Result<()> {
    for activity in activities {
        insert_license_activity(conn, activity)?;
    }
    Ok(())
}

pub fn list_activities(
    conn: &Connection,
    license_id: &str,
    limit: i64,
) -> Result<Vec<LicenseActivity>> {
    let mut stmt = conn.prepare(
        "SELECT id, license_id, action_type, domain, ip_address, metadata, occurred_at
         FROM license_activities WHERE license_id = ?1
         ORDER BY occurred_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![license_id, limit], |row| {
        let action: String = row.get(2)?;
        let metadata: Option<String> = row.get(5)?;
        Ok(LicenseActivity {
            id: row.get(0)?,
            license_id: row.get(1)?,
            action_type: action.parse().unwrap_or(LicenseActivityType::Activate),
            domain: row.get(3)?,
            ip_address: row.get(4)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            occurred_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count_activities(conn: &Connection, license_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM license_activities WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?)
}

/// Outcome of an atomic domain activation attempt.
pub enum ActivationOutcome {
    /// Domain was already activated; no new row written.
    AlreadyActive { activated_domains: Vec<String> },
    /// Quota exhausted; lists the domains holding the slots.
    LimitReached { activated_domains: Vec<String> },
    /// New activation committed.
    Activated { activated_domains: Vec<String> },
}

/// Atomically activate a domain, enforcing the `max_domains` quota.
///
/// Uses an IMMEDIATE transaction so the quota check and the insert are
/// serialized against concurrent activation attempts for the same license.
/// The activation insert, the counter increment, and the ACTIVATE activity
/// row commit together or not at all.
pub fn activate_domain_atomic(
    conn: &mut Connection,
    license_id: &str,
    normalized_domain: &str,
    max_domains: i32,
    ip_address: Option<&str>,
    source: &str,
) -> Result<ActivationOutcome> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let existing = list_activations(&tx, license_id)?;
    if existing
        .iter()
        .any(|a| normalize_domain(&a.domain) == normalized_domain)
    {
        return Ok(ActivationOutcome::AlreadyActive {
            activated_domains: existing.into_iter().map(|a| a.domain).collect(),
        });
    }

    if existing.len() as i32 >= max_domains {
        return Ok(ActivationOutcome::LimitReached {
            activated_domains: existing.into_iter().map(|a| a.domain).collect(),
        });
    }

    let now = now();
    tx.execute(
        "INSERT INTO license_domain_activations (id, license_id, domain, activated_at, ip_address)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gen_id(), license_id, normalized_domain, now, ip_address],
    )?;

    tx.execute(
        "UPDATE licenses SET activation_count = activation_count + 1, updated_at = ?1
         WHERE id = ?2",
        params![now, license_id],
    )?;

    insert_license_activity(
        &tx,
        &NewLicenseActivity {
            license_id: license_id.to_string(),
            action_type: LicenseActivityType::Activate,
            domain: Some(normalized_domain.to_string()),
            ip_address: ip_address.map(String::from),
            metadata: Some(serde_json::json!({ "source": source })),
        },
    )?;

    let domains = activated_domains(&tx, license_id)?;
    tx.commit()?;

    Ok(ActivationOutcome::Activated {
        activated_domains: domains,
    })
}

/// Remove a single domain activation (idempotent). Returns the remaining
/// activated domains, and whether anything was actually removed.
pub fn deactivate_domain(
    conn: &mut Connection,
    license_id: &str,
    normalized_domain: &str,
    ip_address: Option<&str>,
    source: &str,
) -> Result<(bool, Vec<String>)> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let activation = list_activations(&tx, license_id)?
        .into_iter()
        .find(|a| normalize_domain(&a.domain) == normalized_domain);

    let Some(activation) = activation else {
        let remaining = activated_domains(&tx, license_id)?;
        return Ok((false, remaining));
    };

    tx.execute(
        "DELETE FROM license_domain_activations WHERE id = ?1",
        params![&activation.id],
    )?;

    insert_license_activity(
        &tx,
        &NewLicenseActivity {
            license_id: license_id.to_string(),
            action_type: LicenseActivityType::Deactivate,
            domain: Some(normalized_domain.to_string()),
            ip_address: ip_address.map(String::from),
            metadata: Some(serde_json::json!({ "source": source })),
        },
    )?;

    let remaining = activated_domains(&tx, license_id)?;
    tx.commit()?;
    Ok((true, remaining))
}

// ============ Subscriptions ============

pub fn upsert_subscription(conn: &Connection, input: &UpsertSubscription) -> Result<()> {
    let now = now();
    conn.execute(
        "INSERT INTO subscriptions (id, organization_id, status, active, period_ends_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             organization_id = excluded.organization_id,
             status = excluded.status,
             active = excluded.active,
             period_ends_at = excluded.period_ends_at,
             updated_at = excluded.updated_at",
        params![
            &input.id,
            &input.organization_id,
            input.status.as_ref(),
            input.active,
            input.period_ends_at,
            now,
            now
        ],
    )?;
    Ok(())
}

pub fn get_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        params![id],
        subscription_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn has_active_subscription(conn: &Connection, organization_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subscriptions WHERE organization_id = ?1 AND active = 1",
        params![organization_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ============ Subscription-to-license sync primitives ============

/// Licenses that would be touched by a sync for this subscription and still
/// hold at least one activation, with their domains. Captured before the
/// activations are cleared so AUTO_DEACTIVATE activities can name them.
pub fn licenses_with_activations_for_sync(
    conn: &Connection,
    subscription_id: &str,
    organization_id: &str,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM licenses
         WHERE (subscription_id = ?1
                OR (organization_id = ?2 AND subscription_id IS NULL AND deleted_at IS NULL))
           AND EXISTS (SELECT 1 FROM license_domain_activations a WHERE a.license_id = licenses.id)",
        LICENSE_COLS
    ))?;
    let licenses = stmt
        .query_map(params![subscription_id, organization_id], license_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut result = Vec::with_capacity(licenses.len());
    for license in licenses {
        let domains = activated_domains(conn, &license.id)?;
        result.push((license.id, domains));
    }
    Ok(result)
}

/// Link unlinked, non-deleted licenses of the organization to the
/// subscription, applying the computed state. Handles licenses created before
/// the subscription record existed (first-time checkout race).
pub fn link_unlinked_licenses(
    conn: &Connection,
    organization_id: &str,
    subscription_id: &str,
    expires_at: i64,
    active: bool,
    deleted_at: Option<i64>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE licenses SET subscription_id = ?1, expires_at = ?2, active = ?3,
                             deleted_at = ?4, updated_at = ?5
         WHERE organization_id = ?6 AND subscription_id IS NULL AND deleted_at IS NULL",
        params![
            subscription_id,
            expires_at,
            active,
            deleted_at,
            now(),
            organization_id
        ],
    )?)
}

/// Apply the computed subscription state to every license already linked.
pub fn sync_linked_licenses(
    conn: &Connection,
    subscription_id: &str,
    expires_at: i64,
    active: bool,
    deleted_at: Option<i64>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE licenses SET expires_at = ?1, active = ?2, deleted_at = ?3, updated_at = ?4
         WHERE subscription_id = ?5",
        params![expires_at, active, deleted_at, now(), subscription_id],
    )?)
}

/// Drop all activation rows for licenses linked to the subscription.
/// Used when the subscription is paused or canceled.
pub fn clear_activations_for_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM license_domain_activations
         WHERE license_id IN (SELECT id FROM licenses WHERE subscription_id = ?1)",
        params![subscription_id],
    )?)
}

/// Extend license expiry for a paid invoice, without touching other state.
pub fn extend_license_expiry_for_subscription(
    conn: &Connection,
    subscription_id: &str,
    expires_at: i64,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE licenses SET expires_at = ?1, updated_at = ?2 WHERE subscription_id = ?3",
        params![expires_at, now(), subscription_id],
    )?)
}

// ============ Support tickets ============

pub struct CreateTicket<'a> {
    pub organization_id: &'a str,
    pub user_id: &'a str,
    pub subject: &'a str,
    pub priority: TicketPriority,
    pub message: &'a str,
    /// Domain under which the initial Message-ID is minted
    pub email_domain: &'a str,
}

/// Create a ticket and its first message in one transaction.
/// The ticket number is assigned sequentially inside the transaction.
pub fn create_ticket_with_message(
    conn: &mut Connection,
    input: &CreateTicket,
) -> Result<(SupportTicket, TicketMessage)> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let now = now();

    let ticket_number: i64 = tx.query_row(
        "SELECT COALESCE(MAX(ticket_number), 0) + 1 FROM support_tickets",
        [],
        |row| row.get(0),
    )?;

    let ticket_id = gen_id();
    tx.execute(
        "INSERT INTO support_tickets (id, ticket_number, organization_id, user_id, subject,
                                      priority, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN', ?7, ?8)",
        params![
            &ticket_id,
            ticket_number,
            input.organization_id,
            input.user_id,
            input.subject,
            input.priority.as_ref(),
            now,
            now
        ],
    )?;

    let message_id = format!("ticket-{}-msg-initial@{}", ticket_id, input.email_domain);
    let msg_row_id = gen_id();
    tx.execute(
        "INSERT INTO support_ticket_messages (id, ticket_id, user_id, is_staff, message, message_id, created_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)",
        params![&msg_row_id, &ticket_id, input.user_id, input.message, &message_id, now],
    )?;

    tx.commit()?;

    Ok((
        SupportTicket {
            id: ticket_id.clone(),
            ticket_number,
            organization_id: input.organization_id.to_string(),
            user_id: input.user_id.to_string(),
            subject: input.subject.to_string(),
            priority: input.priority,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
        },
        TicketMessage {
            id: msg_row_id,
            ticket_id,
            user_id: Some(input.user_id.to_string()),
            is_staff: false,
            message: input.message.to_string(),
            message_id,
            created_at: now,
        },
    ))
}

pub fn get_ticket_by_id(conn: &Connection, id: &str) -> Result<Option<SupportTicket>> {
    conn.query_row(
        &format!("SELECT {} FROM support_tickets WHERE id = ?1", TICKET_COLS),
        params![id],
        ticket_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_ticket_by_number(conn: &Connection, number: i64) -> Result<Option<SupportTicket>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM support_tickets WHERE ticket_number = ?1",
            TICKET_COLS
        ),
        params![number],
        ticket_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Ticket owned by a specific user (account portal ownership check).
pub fn get_ticket_for_user(
    conn: &Connection,
    ticket_id: &str,
    user_id: &str,
) -> Result<Option<SupportTicket>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM support_tickets WHERE id = ?1 AND user_id = ?2",
            TICKET_COLS
        ),
        params![ticket_id, user_id],
        ticket_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn first_message_for_ticket(
    conn: &Connection,
    ticket_id: &str,
) -> Result<Option<TicketMessage>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM support_ticket_messages WHERE ticket_id = ?1
             ORDER BY created_at ASC, id ASC LIMIT 1",
            MESSAGE_COLS
        ),
        params![ticket_id],
        message_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Find a stored message by its email Message-ID (In-Reply-To matching).
pub fn find_message_by_message_id(
    conn: &Connection,
    message_id: &str,
) -> Result<Option<TicketMessage>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM support_ticket_messages WHERE message_id = ?1 LIMIT 1",
            MESSAGE_COLS
        ),
        params![message_id],
        message_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_messages(conn: &Connection, ticket_id: &str) -> Result<Vec<TicketMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM support_ticket_messages WHERE ticket_id = ?1
         ORDER BY created_at ASC, id ASC",
        MESSAGE_COLS
    ))?;
    let rows = stmt.query_map(params![ticket_id], message_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub struct NewTicketMessage<'a> {
    pub ticket_id: &'a str,
    pub user_id: Option<&'a str>,
    pub is_staff: bool,
    pub message: &'a str,
    pub message_id: &'a str,
}

/// Append a message and flip the ticket status in one transaction.
pub fn add_ticket_message(
    conn: &mut Connection,
    input: &NewTicketMessage,
    new_status: TicketStatus,
) -> Result<TicketMessage> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let now = now();
    let id = gen_id();

    tx.execute(
        "INSERT INTO support_ticket_messages (id, ticket_id, user_id, is_staff, message, message_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            input.ticket_id,
            input.user_id,
            input.is_staff,
            input.message,
            input.message_id,
            now
        ],
    )?;

    tx.execute(
        "UPDATE support_tickets SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_status.as_ref(), now, input.ticket_id],
    )?;

    tx.commit()?;

    Ok(TicketMessage {
        id,
        ticket_id: input.ticket_id.to_string(),
        user_id: input.user_id.map(String::from),
        is_staff: input.is_staff,
        message: input.message.to_string(),
        message_id: input.message_id.to_string(),
        created_at: now,
    })
}

pub struct NewAttachment<'a> {
    pub message_id: &'a str,
    pub filename: &'a str,
    pub data: &'a [u8],
    pub content_type: &'a str,
    pub content_id: Option<&'a str>,
}

pub fn insert_attachment(conn: &Connection, input: &NewAttachment) -> Result<String> {
    use sha2::{Digest, Sha256};
    let id = gen_id();
    let hash = hex::encode(Sha256::digest(input.data));
    conn.execute(
        "INSERT INTO support_ticket_message_attachments
             (id, message_id, filename, data, content_type, content_id, size, hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            input.message_id,
            input.filename,
            input.data,
            input.content_type,
            input.content_id,
            input.data.len() as i64,
            &hash,
            now()
        ],
    )?;
    Ok(id)
}

pub fn get_attachment(conn: &Connection, id: &str) -> Result<Option<TicketAttachment>> {
    conn.query_row(
        "SELECT id, message_id, filename, data, content_type, content_id, size, hash, created_at
         FROM support_ticket_message_attachments WHERE id = ?1",
        params![id],
        |row| {
            Ok(TicketAttachment {
                id: row.get(0)?,
                message_id: row.get(1)?,
                filename: row.get(2)?,
                data: row.get(3)?,
                content_type: row.get(4)?,
                content_id: row.get(5)?,
                size: row.get(6)?,
                hash: row.get(7)?,
                created_at: row.get(8)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn count_attachments_for_message(conn: &Connection, message_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM support_ticket_message_attachments WHERE message_id = ?1",
        params![message_id],
        |row| row.get(0),
    )?)
}
