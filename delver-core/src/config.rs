//! Configuration system for Delver.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment. The user config lives at `~/.config/delver/config.toml`;
//! environment overrides use the `DELVER_` prefix with `__` as the section
//! separator (e.g. `DELVER_CACHE__TTL_SECS=60`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for a research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Retries allowed per sub-query after the first attempt (total attempts
    /// are `max_retries + 1`).
    pub max_retries: u32,
    /// Upper bound on simultaneously in-flight searches.
    pub max_parallel_searches: usize,
    /// Minimum average relevance for a search attempt to count as useful.
    pub relevance_threshold: f64,
    /// Analyst fallback threshold, applied only when the strict pass yields
    /// zero candidates. Exactly two tiers; no further fallback.
    pub fallback_relevance_threshold: f64,
    /// Maximum hits requested from the search provider per query.
    pub max_search_results: usize,
    /// Optional wall-clock deadline for the search stage, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
    pub cache: CacheConfig,
    pub search: SearchProviderConfig,
}

/// Configuration for the disk-backed search cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one JSON file per cached query.
    pub dir: PathBuf,
    /// Time-to-live for cached entries, in seconds.
    pub ttl_secs: u64,
}

/// Configuration for the external search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    /// API key for the hosted search service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_parallel_searches: 3,
            relevance_threshold: 0.5,
            fallback_relevance_threshold: 0.3,
            max_search_results: 5,
            deadline_secs: None,
            cache: CacheConfig::default(),
            search: SearchProviderConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".delver/cache"),
            ttl_secs: 86_400,
        }
    }
}

impl Default for SearchProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            timeout_secs: 15,
        }
    }
}

impl ResearchConfig {
    /// The search-stage deadline as a `Duration`, if configured.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Validate invariants that figment cannot express.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_parallel_searches == 0 {
            return Err(ConfigError::Invalid {
                message: "max_parallel_searches must be at least 1".into(),
            });
        }
        for (name, value) in [
            ("relevance_threshold", self.relevance_threshold),
            (
                "fallback_relevance_threshold",
                self.fallback_relevance_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    message: format!("{name} must be within 0.0..=1.0, got {value}"),
                });
            }
        }
        if self.fallback_relevance_threshold > self.relevance_threshold {
            return Err(ConfigError::Invalid {
                message: "fallback_relevance_threshold must not exceed relevance_threshold".into(),
            });
        }
        Ok(())
    }
}

/// Load configuration with layering: defaults -> config file -> environment.
///
/// An explicit `path` replaces the user config file lookup entirely.
pub fn load_config(path: Option<&Path>) -> std::result::Result<ResearchConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ResearchConfig::default()));

    match path {
        Some(p) => {
            figment = figment.merge(Toml::file(p));
        }
        None => {
            if let Some(dirs) = directories::ProjectDirs::from("", "", "delver") {
                let user_config = dirs.config_dir().join("config.toml");
                if user_config.exists() {
                    figment = figment.merge(Toml::file(user_config));
                }
            }
        }
    }

    figment = figment.merge(Env::prefixed("DELVER_").split("__"));

    let config: ResearchConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
