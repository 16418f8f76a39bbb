use anyhow::{Context, Result};
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BACKEND_URL: &str = "http://localhost:8001";
const DEFAULT_DATA_DIR: &str = ".storefront";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_VOLUME: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend_url: String,
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub default_volume: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            default_volume: DEFAULT_VOLUME,
        }
    }
}

impl StoreConfig {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Self> {
        if dotenv::dotenv().is_err() {
            debug!("No .env file found, using process environment only");
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = StoreConfig::default();

        if let Some(url) = lookup("BACKEND_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.is_empty() {
                warn!("BACKEND_URL is empty, keeping {}", config.backend_url);
            } else {
                config.backend_url = url;
            }
        }

        if let Some(dir) = lookup("STOREFRONT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("STOREFRONT_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid STOREFRONT_HTTP_TIMEOUT_SECS: {}", raw))?;
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("STOREFRONT_DEFAULT_VOLUME") {
            let volume: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid STOREFRONT_DEFAULT_VOLUME: {}", raw))?;
            if !volume.is_finite() {
                anyhow::bail!("STOREFRONT_DEFAULT_VOLUME must be a finite number");
            }
            config.default_volume = volume.clamp(0.0, 1.0);
        }

        Ok(config)
    }

    /// Base URL of the REST API, e.g. `http://localhost:8001/api`.
    pub fn api_base(&self) -> String {
        format!("{}/api", self.backend_url)
    }
}
