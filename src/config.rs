// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub server_port: u16,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Maximum size of the PostgreSQL connection pool.
    pub max_db_conns: u32,
    /// Redis connection string.
    pub redis_url: String,
    /// Secret key for signing JWTs.
    pub jwt_secret: String,
    /// JWT lifetime in hours. Also the TTL of the single-device session key.
    pub jwt_expiry_hours: u64,
    /// Origins allowed for CORS and WebSocket upgrades.
    /// Empty means all origins are permitted (dev default).
    pub allowed_origins: Vec<String>,
    /// Logging level (e.g., "info", "debug").
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from `.env` file and environment variables.
    /// Panics if required variables are missing.
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        Self {
            server_port: env_parse("SERVER_PORT", 8080),
            database_url,
            max_db_conns: env_parse("MAX_DB_CONNS", 16),
            redis_url,
            jwt_secret,
            jwt_expiry_hours: env_parse("JWT_EXPIRY_HOURS", 24),
            allowed_origins: parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Splits a comma-separated origins string into a trimmed list.
/// Empty input yields an empty list, which means allow-all.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_origins_empty_means_allow_all() {
        assert!(parse_origins("").is_empty());
        assert!(parse_origins("  ").is_empty());
    }

    #[test]
    fn parse_origins_trims_and_splits() {
        let origins = parse_origins("https://a.example, https://b.example ,");
        assert_eq!(origins, vec!["https://a.example", "https://b.example"]);
    }
}
