use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use scribe_ingest::FetchConfig;

/// Process configuration, read from `SCRIBE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub public_dir: PathBuf,
    pub fetch: FetchConfig,
    pub max_fetches_per_message: usize,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load `.env` if present, then read the environment. A variable that is
    /// set but does not parse is an error rather than a silent default.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let fetch_timeout_secs: u64 = parse_or(&lookup, "SCRIBE_FETCH_TIMEOUT_SECS", 30)?;
        let shutdown_grace_secs: u64 = parse_or(&lookup, "SCRIBE_SHUTDOWN_GRACE_SECS", 10)?;

        Ok(Self {
            host: lookup("SCRIBE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "SCRIBE_PORT", 8080)?,
            db_path: lookup("SCRIBE_DB_PATH").unwrap_or_else(|| "scribe.db".into()).into(),
            public_dir: lookup("SCRIBE_PUBLIC_DIR").unwrap_or_else(|| "public".into()).into(),
            fetch: FetchConfig {
                timeout: Duration::from_secs(fetch_timeout_secs),
                max_bytes: parse_or(&lookup, "SCRIBE_MAX_ATTACHMENT_BYTES", 50 * 1024 * 1024)?,
                max_concurrent: parse_or(&lookup, "SCRIBE_MAX_FETCHES_GLOBAL", 32)?,
            },
            max_fetches_per_message: parse_or(&lookup, "SCRIBE_MAX_FETCHES_PER_MESSAGE", 4)?,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}
