//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,

    // Database (optional message log backend)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Collaboration
    pub heartbeat_interval_secs: u64,
    pub recent_edits_capacity: usize,
    pub message_log_capacity: usize,
    pub max_message_bytes: usize,
}

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Upper bound for `JWT_EXPIRY_HOURS` (one year)
pub const MAX_JWT_EXPIRY_HOURS: i64 = 24 * 366;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let heartbeat_interval_secs = parse_or("HEARTBEAT_INTERVAL_SECS", 30);
        if heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "HEARTBEAT_INTERVAL_SECS must be greater than zero",
            ));
        }

        let jwt_expiry_hours = parse_or("JWT_EXPIRY_HOURS", 24);
        if !(1..=MAX_JWT_EXPIRY_HOURS).contains(&jwt_expiry_hours) {
            return Err(ConfigError::Invalid(
                "JWT_EXPIRY_HOURS must be between 1 and 8784",
            ));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 3),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours,

            // Collaboration
            heartbeat_interval_secs,
            recent_edits_capacity: parse_or("RECENT_EDITS_CAPACITY", 50),
            message_log_capacity: parse_or("MESSAGE_LOG_CAPACITY", 10_000),
            max_message_bytes: parse_or("MAX_MESSAGE_BYTES", 65_536),
        })
    }

    /// Heartbeat interval as a `Duration`
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Read and parse an environment variable, falling back to `default` when it is
/// unset or unparsable
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
