//! Service configuration loaded from environment variables.
//!
//! Everything has a default so a desktop build runs with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use gmcache_shared::constants::{
    DEFAULT_PAGE_LIMIT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_INITIAL_MS, DEFAULT_RETRY_MAX_MS,
};

use crate::history::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding `cache.db` and `persist.db`.
    /// Env: `GMCACHE_DATA_DIR`
    /// Default: the platform data directory, falling back to `./gmcache-data`.
    pub data_dir: PathBuf,

    /// Attempts per remote call, including the first.
    /// Env: `GMCACHE_RETRY_ATTEMPTS`
    pub retry_attempts: u32,

    /// Env: `GMCACHE_RETRY_INITIAL_MS`
    pub retry_initial_delay: Duration,

    /// Env: `GMCACHE_RETRY_MAX_MS`
    pub retry_max_delay: Duration,

    /// Default number of messages in a local listing.
    /// Env: `GMCACHE_PAGE_LIMIT`
    pub page_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = gmcache_store::default_data_dir().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "no platform data directory, using ./gmcache-data");
            PathBuf::from("./gmcache-data")
        });
        Self {
            data_dir,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("GMCACHE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(n) = parse_var::<u32>("GMCACHE_RETRY_ATTEMPTS") {
            config.retry_attempts = n.max(1);
        }
        if let Some(ms) = parse_var::<u64>("GMCACHE_RETRY_INITIAL_MS") {
            config.retry_initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("GMCACHE_RETRY_MAX_MS") {
            config.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>("GMCACHE_PAGE_LIMIT") {
            if n == 0 {
                tracing::warn!("GMCACHE_PAGE_LIMIT must be positive, using default");
            } else {
                config.page_limit = n;
            }
        }

        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay.max(self.retry_initial_delay),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_clamps_max_delay() {
        let config = SyncConfig {
            data_dir: PathBuf::from("/tmp/x"),
            retry_attempts: 2,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_millis(100),
            page_limit: 20,
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.max_delay, Duration::from_millis(500));
    }

    #[test]
    fn defaults_match_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.page_limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    }
}
