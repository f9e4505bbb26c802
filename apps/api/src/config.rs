use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Panics at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Provider API key — externally supplied, never defaulted in code.
    pub gemini_api_key: String,
    /// Full `generateContent` endpoint URL, including the model segment.
    pub gemini_api_url: String,
    /// Upper bound on a single provider call, in seconds.
    pub gemini_timeout_secs: u64,
    /// Charge strategy: "charge_before_generate" (default) or "charge_on_success".
    pub charge_policy: String,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            gemini_api_url: require_env("GEMINI_API_URL")?,
            gemini_timeout_secs: std::env::var("GEMINI_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .context("GEMINI_TIMEOUT_SECS must be a number of seconds")?,
            charge_policy: std::env::var("CHARGE_POLICY")
                .unwrap_or_else(|_| "charge_before_generate".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
