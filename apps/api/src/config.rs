use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub jwt_secret: String,
    pub port: u16,
    pub rust_log: String,
    pub render_workers: usize,
    pub render_timeout: Duration,
    /// How long a timed-out render may keep running before it is killed.
    pub render_abandon_grace: Duration,
    pub latex_command: String,
    /// Store PDFs on local disk instead of S3 when set.
    pub artifact_dir: Option<PathBuf>,
    pub artifact_ttl: Duration,
    pub janitor_interval: Duration,
    pub worker_idle_poll: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let render_workers: usize = optional_env("RENDER_WORKERS", 4)?;
        anyhow::ensure!(render_workers > 0, "RENDER_WORKERS must be at least 1");

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            jwt_secret: require_env("JWT_SECRET")?,
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            render_workers,
            render_timeout: Duration::from_secs(optional_env("RENDER_TIMEOUT_SECS", 60)?),
            render_abandon_grace: Duration::from_secs(optional_env(
                "RENDER_ABANDON_GRACE_SECS",
                30,
            )?),
            latex_command: std::env::var("LATEX_COMMAND")
                .unwrap_or_else(|_| "tectonic".to_string()),
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            artifact_ttl: Duration::from_secs(optional_env("ARTIFACT_TTL_SECS", 86_400)?),
            janitor_interval: Duration::from_secs(optional_env("JANITOR_INTERVAL_SECS", 300)?),
            worker_idle_poll: Duration::from_millis(optional_env("WORKER_IDLE_POLL_MS", 2_000)?),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}
