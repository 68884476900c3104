use std::path::PathBuf;
use std::time::Duration;

const ENV_FILE: &str = ".env.local";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings, read from `FEEDSYNC_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    /// Trust window for snapshots resolved during a refresh cycle.
    pub cycle_ttl: Duration,
    /// Trust window for the snapshot decoded while adding a source.
    pub add_ttl: Duration,
    pub http_timeout: Duration,
    pub max_retries: usize,
    pub sync_interval: Duration,
    pub cache_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://feedsync.db?mode=rwc".to_string(),
            cycle_ttl: Duration::from_secs(5 * 60),
            add_ttl: Duration::from_secs(20 * 60),
            http_timeout: Duration::from_secs(20),
            max_retries: 2,
            sync_interval: Duration::from_secs(600),
            cache_path: None,
        }
    }
}

impl AppConfig {
    /// Loads `.env.local` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::from_filename(ENV_FILE);
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            database_url: value("FEEDSYNC_DATABASE_URL").unwrap_or(defaults.database_url),
            cycle_ttl: secs(&value, "FEEDSYNC_CYCLE_TTL_SECS")?.unwrap_or(defaults.cycle_ttl),
            add_ttl: secs(&value, "FEEDSYNC_ADD_TTL_SECS")?.unwrap_or(defaults.add_ttl),
            http_timeout: secs(&value, "FEEDSYNC_HTTP_TIMEOUT_SECS")?.unwrap_or(defaults.http_timeout),
            max_retries: number(&value, "FEEDSYNC_MAX_RETRIES")?
                .map(|retries| retries as usize)
                .unwrap_or(defaults.max_retries),
            sync_interval: secs(&value, "FEEDSYNC_SYNC_INTERVAL_SECS")?.unwrap_or(defaults.sync_interval),
            cache_path: value("FEEDSYNC_CACHE_PATH").map(PathBuf::from),
        })
    }
}

fn number(
    value: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    value(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid { key, value: raw })
        })
        .transpose()
}

fn secs(
    value: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(number(value, key)?.map(Duration::from_secs))
}
