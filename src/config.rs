use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::RetryPolicy;
use crate::engine::StoreOptions;

pub const WAL_FILE_NAME: &str = "roomlock.wal";

/// Runtime settings, read once at start-up from `ROOMLOCK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    pub wal_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(2000),
            wal_timeout: Duration::from_millis(5000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset or unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| parse_value::<u64>(&s));
        Self {
            data_dir: lookup("ROOMLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: parsed("ROOMLOCK_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            wal_timeout: parsed("ROOMLOCK_WAL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.wal_timeout),
            max_retries: lookup("ROOMLOCK_MAX_RETRIES")
                .and_then(|s| parse_value(&s))
                .unwrap_or(defaults.max_retries),
            retry_backoff: parsed("ROOMLOCK_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            compact_threshold: parsed("ROOMLOCK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            lock_timeout: self.lock_timeout,
            wal_timeout: self.wal_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.retry_backoff,
        }
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!("ignoring unparsable config value {raw:?}");
    }
    parsed
}
