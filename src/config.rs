//! Feed engine configuration, loaded from an optional TOML file.
//!
//! A missing file yields `FeedConfig::default()`. Unknown keys are accepted
//! but logged, so a typo doesn't silently disable a setting. The config is
//! converted into a [`CachePolicy`] and threaded into the generator at
//! construction time; nothing here is process-global.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::{CachePolicy, MaxAge, DEFAULT_CACHE_CAPACITY, DEFAULT_NONGROUPED_MAX_AGE_SECS};
use crate::pagination::DEFAULT_PAGE_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file too large: {0}")]
    TooLarge(String),
}

/// Engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to defaults. Max-age values are in
/// seconds, with a negative value meaning "cache forever". Forever is only
/// valid for grouped feeds; a forever non-grouped setting is corrected to
/// the finite default when the [`CachePolicy`] is built.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    /// Works per page when the request doesn't say.
    pub default_page_size: usize,

    /// Max age of cached grouped feeds, in seconds; negative = forever.
    pub grouped_max_age_seconds: i64,

    /// Max age of cached non-grouped feeds, in seconds; negative values
    /// are a misconfiguration and get corrected.
    pub nongrouped_max_age_seconds: i64,

    /// Records retained by the bundled in-memory cache store.
    pub cache_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            grouped_max_age_seconds: -1,
            nongrouped_max_age_seconds: DEFAULT_NONGROUPED_MAX_AGE_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl FeedConfig {
    /// Maximum config file size (1 MB); larger files are refused rather
    /// than read into memory.
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 4] = [
        "default_page_size",
        "grouped_max_age_seconds",
        "nongrouped_max_age_seconds",
        "cache_capacity",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(FeedConfig::default())`
    /// - Empty file → `Ok(FeedConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line info
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "unknown key in config file, ignoring");
                }
            }
        }

        let config: FeedConfig = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded feed configuration");
        Ok(config)
    }

    /// The cache policy this configuration asks for, with invalid
    /// combinations corrected.
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::new(
            max_age_from_seconds(self.grouped_max_age_seconds),
            max_age_from_seconds(self.nongrouped_max_age_seconds),
        )
    }
}

fn max_age_from_seconds(seconds: i64) -> MaxAge {
    if seconds < 0 {
        MaxAge::Forever
    } else {
        MaxAge::seconds(seconds)
    }
}
