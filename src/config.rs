//! Service configuration, read once from `DESKBOOK_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEV_JWT_SECRET: &str = "deskbook-dev-secret-not-for-production";

#[derive(Debug, Clone)]
pub struct Config {
    /// development | production
    pub environment: String,
    pub bind: String,
    pub port: u16,
    /// Directory holding `bookings.wal`
    pub data_dir: PathBuf,
    /// HS256 secret for access tokens
    pub jwt_secret: String,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
    /// WAL appends before the compactor rewrites the log
    pub compact_threshold: u64,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, BoxError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BoxError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let environment = var("DESKBOOK_ENV").unwrap_or_else(|| "development".into());

        let jwt_secret = match var("DESKBOOK_JWT_SECRET") {
            Some(secret) => secret,
            None if environment == "development" => {
                tracing::warn!("DESKBOOK_JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
            None => return Err(format!("DESKBOOK_JWT_SECRET must be set in {environment} environment").into()),
        };

        Ok(Self {
            bind: var("DESKBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(var("DESKBOOK_PORT"), "DESKBOOK_PORT", 8800)?,
            data_dir: PathBuf::from(var("DESKBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            jwt_secret,
            metrics_port: var("DESKBOOK_METRICS_PORT")
                .map(|p| p.parse().map_err(|_| format!("DESKBOOK_METRICS_PORT is not a port: {p}")))
                .transpose()?,
            compact_threshold: parse_or(var("DESKBOOK_COMPACT_THRESHOLD"), "DESKBOOK_COMPACT_THRESHOLD", 1000)?,
            request_timeout: Duration::from_secs(parse_or(
                var("DESKBOOK_REQUEST_TIMEOUT_SECS"),
                "DESKBOOK_REQUEST_TIMEOUT_SECS",
                30,
            )?),
            environment,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T, BoxError> {
    match value {
        Some(v) => v.parse().map_err(|_| format!("{name} has an invalid value: {v}").into()),
        None => Ok(default),
    }
}
