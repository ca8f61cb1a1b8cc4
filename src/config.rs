//! Configuration management for the offline reader

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Progress API base url; `None` keeps progress on this device only
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            database: DatabaseConfig {
                url: "sqlite:./libros-offline.db".to_string(),
            },
            remote: RemoteConfig {
                base_url: None,
                timeout: Duration::from_secs(10),
            },
        }
    }
}

impl Config {
    /// Read settings from the environment, falling back to defaults for
    /// anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let eviction_fraction: f64 = parse_or(
            &lookup,
            "CACHE_EVICTION_FRACTION",
            defaults.cache.eviction_fraction,
        )?;
        if !(eviction_fraction > 0.0 && eviction_fraction <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "CACHE_EVICTION_FRACTION",
                value: eviction_fraction.to_string(),
            });
        }

        let interval_secs: u64 = parse_or(
            &lookup,
            "SYNC_INTERVAL_SECS",
            defaults.sync.interval.as_secs(),
        )?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SYNC_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            cache: CacheConfig {
                max_size_bytes: parse_or(
                    &lookup,
                    "CACHE_MAX_SIZE_BYTES",
                    defaults.cache.max_size_bytes,
                )?,
                eviction_fraction,
            },
            sync: SyncConfig {
                interval: Duration::from_secs(interval_secs),
                device_id: lookup("DEVICE_ID")
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or(defaults.sync.device_id),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            remote: RemoteConfig {
                base_url: lookup("PROGRESS_API_URL").filter(|url| !url.trim().is_empty()),
                timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "PROGRESS_API_TIMEOUT_SECS",
                    defaults.remote.timeout.as_secs(),
                )?),
            },
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
