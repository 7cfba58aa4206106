//! Server Configuration
//!
//! Flat configuration read from the environment (with `.env` support for
//! local development). Secrets (webhook secret, bot token) are only ever
//! supplied this way.

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Shared secret for GitHub webhook signatures
    pub webhook_secret: String,
    /// "owner/repo" whose forks start games
    pub upstream_repo: String,
    /// Token the character bot acts with
    pub github_token: String,
    /// Internal fast-tick period in seconds; 0 disables
    pub fast_tick_secs: u64,
    /// Internal full-tick period in seconds; 0 disables
    pub full_tick_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            port: parse_or("PORT", 8080),
            database_url: env_or("DATABASE_URL", "sqlite:gitquest.db?mode=rwc"),
            webhook_secret: env_or("WEBHOOK_SECRET", ""),
            upstream_repo: env_or("UPSTREAM_REPO", "gitquest/welcome"),
            github_token: env_or("GITHUB_TOKEN", ""),
            fast_tick_secs: parse_or("FAST_TICK_SECS", 30),
            full_tick_secs: parse_or("FULL_TICK_SECS", 300),
        };

        if config.webhook_secret.is_empty() {
            warn!("WEBHOOK_SECRET is empty; webhook signatures will not validate");
        }
        if config.github_token.is_empty() {
            warn!("GITHUB_TOKEN is empty; character actions will fail");
        }

        config
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("Could not parse {}='{}', using default", key, value);
            default
        }),
        Err(_) => default,
    }
}
