//! Database pool, schema, and shared application state.

pub mod queries;

use std::sync::Arc;

use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::email::EmailService;
use crate::error::Result;
use crate::payments::stripe::StripeClient;
use crate::rate_limit::RateLimits;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub email: EmailService,
    pub stripe: Option<StripeClient>,
    pub limits: Arc<RateLimits>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Self {
        let email = EmailService::from_config(&config);
        let stripe = config.stripe_secret_key.clone().map(StripeClient::new);
        Self {
            db,
            config: Arc::new(config),
            email,
            stripe,
            limits: Arc::new(RateLimits::new()),
        }
    }
}

/// Open (or create) the database file and apply the schema.
pub fn init_db(path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
    });
    let pool = r2d2::Pool::new(manager)
        .map_err(|e| crate::error::AppError::Internal(format!("Failed to create pool: {}", e)))?;

    let conn = pool.get()?;
    init_schema(&conn)?;

    Ok(pool)
}

pub fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            site_url TEXT,
            billing_customer_id TEXT,
            stripe_account_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            token TEXT NOT NULL UNIQUE,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            status TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            period_ends_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            max_domains INTEGER NOT NULL DEFAULT 1,
            activation_count INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            expires_at INTEGER NOT NULL,
            deleted_at INTEGER,
            subscription_id TEXT REFERENCES subscriptions(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS license_domain_activations (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            domain TEXT NOT NULL,
            activated_at INTEGER NOT NULL,
            ip_address TEXT,
            UNIQUE (license_id, domain)
        );

        CREATE TABLE IF NOT EXISTS license_activities (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            action_type TEXT NOT NULL,
            domain TEXT,
            ip_address TEXT,
            metadata TEXT,
            occurred_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS support_tickets (
            id TEXT PRIMARY KEY,
            ticket_number INTEGER NOT NULL UNIQUE,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            subject TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'MEDIUM',
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS support_ticket_messages (
            id TEXT PRIMARY KEY,
            ticket_id TEXT NOT NULL REFERENCES support_tickets(id),
            user_id TEXT REFERENCES users(id),
            is_staff INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL,
            message_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS support_ticket_message_attachments (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES support_ticket_messages(id),
            filename TEXT NOT NULL,
            data BLOB NOT NULL,
            content_type TEXT NOT NULL,
            content_id TEXT,
            size INTEGER NOT NULL,
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_activations_domain
            ON license_domain_activations(domain);
        CREATE INDEX IF NOT EXISTS idx_activities_license
            ON license_activities(license_id, occurred_at);
        CREATE INDEX IF NOT EXISTS idx_licenses_org
            ON licenses(organization_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_subscription
            ON licenses(subscription_id);
        CREATE INDEX IF NOT EXISTS idx_messages_ticket
            ON support_ticket_messages(ticket_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_message_id
            ON support_ticket_messages(message_id);",
    )?;
    Ok(())
}
