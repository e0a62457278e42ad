use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Shared secret for HMAC verification of WordPress plugin requests
    pub plugin_secret_key: String,
    /// Stripe Connect platform secret key (used for all proxied API calls)
    pub stripe_secret_key: Option<String>,
    /// Stripe Connect OAuth client id handed out to plugins
    pub stripe_connect_client_id: Option<String>,
    /// Shared secret for billing webhook signature verification
    pub billing_webhook_secret: Option<String>,
    /// Postmark server token for outbound notification emails
    pub postmark_server_token: Option<String>,
    /// Address the support team reads (notification recipient)
    pub support_email: String,
    /// Inbound address customers reply to
    pub support_email_inbound: String,
    /// Domain our own notification Message-IDs are minted under
    pub email_domain: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("DEPOSITDESK_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "depositdesk.db".to_string()),
            base_url,
            dev_mode,
            plugin_secret_key: env::var("PLUGIN_SECRET_KEY").unwrap_or_default(),
            stripe_secret_key: env::var("STRIPE_CONNECT_CLIENT_SECRET").ok(),
            stripe_connect_client_id: env::var("STRIPE_CONNECT_CLIENT_ID").ok(),
            billing_webhook_secret: env::var("BILLING_WEBHOOK_SECRET").ok(),
            postmark_server_token: env::var("POSTMARK_SERVER_TOKEN").ok(),
            support_email: env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@example.com".to_string()),
            support_email_inbound: env::var("SUPPORT_EMAIL_INBOUND")
                .unwrap_or_else(|_| "support@support.example.com".to_string()),
            email_domain: env::var("EMAIL_DOMAIN").unwrap_or_else(|_| "example.com".to_string()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
