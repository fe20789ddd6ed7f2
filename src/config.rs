use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CarouselError, Result};

/// Dispatcher configuration loaded from environment variables
///
/// Every field has a default, so `Config::default()` plus an inline proxy
/// list is enough for embedding; `from_env` exists for crawler processes
/// that configure through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inline proxy list
    pub proxy_list: Vec<String>,
    /// Optional path to a proxy list file, one proxy per line
    pub proxy_list_path: Option<PathBuf>,
    /// Stats logging interval; zero disables the stats logger (default: 30s)
    pub logstats_interval: Duration,
    /// Reanimation sweep interval (default: 5s)
    pub reanimate_interval: Duration,
    /// Abort instead of resetting the pool when no proxies are available
    /// (default: false)
    pub stop_if_no_proxies: bool,
    /// Times to retry a page with a different proxy before the failure is
    /// treated as a page failure rather than a proxy failure (default: 5)
    pub max_retries: u32,
    /// Base backoff time for dead proxies (default: 300s)
    pub backoff_base: Duration,
    /// Backoff time cap (default: 3600s)
    pub backoff_cap: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_list: Vec::new(),
            proxy_list_path: None,
            logstats_interval: Duration::from_secs(30),
            reanimate_interval: Duration::from_secs(5),
            stop_if_no_proxies: false,
            max_retries: 5,
            backoff_base: Duration::from_secs(300),
            backoff_cap: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let proxy_list = get_env_or("CAROUSEL_PROXY_LIST", "")
            .split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect();
        let proxy_list_path = match env::var("CAROUSEL_PROXY_LIST_PATH") {
            Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
            _ => None,
        };

        Ok(Config {
            proxy_list,
            proxy_list_path,
            logstats_interval: secs_env("CAROUSEL_LOGSTATS_INTERVAL", 30.0)?,
            reanimate_interval: secs_env("CAROUSEL_REANIMATE_INTERVAL", 5.0)?,
            stop_if_no_proxies: get_env_or("CAROUSEL_STOP_IF_NO_PROXIES", "false")
                .parse()
                .unwrap_or(false),
            max_retries: get_env_or("CAROUSEL_PAGE_RETRY_TIMES", "5")
                .parse()
                .map_err(|_| {
                    CarouselError::InvalidConfig(
                        "CAROUSEL_PAGE_RETRY_TIMES must be a number".into(),
                    )
                })?,
            backoff_base: secs_env("CAROUSEL_BACKOFF_BASE", 300.0)?,
            backoff_cap: secs_env("CAROUSEL_BACKOFF_CAP", 3600.0)?,
        })
    }

    /// Collect raw proxy entries from the inline list and the file source.
    ///
    /// Lines are passed through as-is; the registry performs the
    /// blank/comment/dedup cleanup.
    pub fn load_proxy_entries(&self) -> Result<Vec<String>> {
        let mut entries = self.proxy_list.clone();
        if let Some(path) = &self.proxy_list_path {
            let contents = fs::read_to_string(path)?;
            entries.extend(contents.lines().map(str::to_string));
        }
        Ok(entries)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable as a non-negative number of seconds
fn secs_env(key: &str, default: f64) -> Result<Duration> {
    let raw = get_env_or(key, &default.to_string());
    let secs: f64 = raw.parse().map_err(|_| {
        CarouselError::InvalidConfig(format!("{} must be a number of seconds", key))
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CarouselError::InvalidConfig(format!(
            "{} must be a non-negative number of seconds",
            key
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}
