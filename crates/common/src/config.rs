use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP API listens on (default: 3000)
    pub api_port: u16,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: String,

    /// Twilio account SID for SMS delivery
    pub twilio_account_sid: Option<String>,

    /// Twilio auth token
    pub twilio_auth_token: Option<String>,

    /// Twilio sender phone number
    pub twilio_from_number: Option<String>,

    /// Upper bound on a single channel send, in seconds (default: 30)
    pub delivery_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            resend_api_key: non_empty_var("RESEND_API_KEY"),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "notifications@herald.local".to_string()),
            twilio_account_sid: non_empty_var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: non_empty_var("TWILIO_AUTH_TOKEN"),
            twilio_from_number: non_empty_var("TWILIO_FROM_NUMBER"),
            delivery_timeout_secs: std::env::var("DELIVERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_TIMEOUT_SECS must be a valid u64"))?,
        })
    }

    /// Twilio credentials, present only when all three variables are set.
    pub fn twilio_credentials(&self) -> Option<(&str, &str, &str)> {
        match (
            &self.twilio_account_sid,
            &self.twilio_auth_token,
            &self.twilio_from_number,
        ) {
            (Some(sid), Some(token), Some(from)) => Some((sid, token, from)),
            _ => None,
        }
    }
}

/// An unset or blank credential counts as absent.
fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
