//! Gateway configuration.
//!
//! Loaded from a YAML file with environment-variable overrides. Every
//! section has defaults so an empty config is valid (memory store, local
//! embedding sidecar, no static backends).

use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toolscout_mcp::{BackendConfig, HealthConfig, RetryConfig};

/// Environment variable naming the config file.
pub const ENV_CONFIG: &str = "TOOLSCOUT_CONFIG";
/// Environment override for the embedding service URL.
pub const ENV_EMBEDDING_URL: &str = "TOOLSCOUT_EMBEDDING_URL";
/// Environment override forcing the redis store.
pub const ENV_REDIS_URL: &str = "TOOLSCOUT_REDIS_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub exposure: ExposureConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub health: HealthConfig,

    /// Statically configured backends.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Discover, embed, classify, and index backend catalogs at startup
    /// when the store is empty.
    #[serde(default)]
    pub bootstrap_index: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Redis {
        url: String,
        #[serde(default = "default_index_name")]
        index: String,
    },
}

fn default_index_name() -> String {
    "tools".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result count when the caller does not ask for one.
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Hard clamp on requested result counts.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    #[serde(default = "default_min_score")]
    pub min_score: f32,

    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
}

fn default_search_limit() -> usize {
    8
}

fn default_max_limit() -> usize {
    50
}

fn default_min_score() -> f32 {
    0.25
}

fn default_lexical_weight() -> f32 {
    toolscout_retrieval::DEFAULT_LEXICAL_WEIGHT
}

fn default_vector_weight() -> f32 {
    toolscout_retrieval::DEFAULT_VECTOR_WEIGHT
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_limit: default_max_limit(),
            min_score: default_min_score(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Requests of disuse before an unrefreshed tool is dropped.
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: u64,

    /// Tools that stay exposed regardless of usage, as `server:tool`
    /// qualified names.
    #[serde(default)]
    pub always_exposed: Vec<String>,
}

fn default_eviction_threshold() -> u64 {
    5
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            eviction_threshold: default_eviction_threshold(),
            always_exposed: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load from a YAML file (or defaults when `path` is `None`), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                serde_yaml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_EMBEDDING_URL) {
            if !url.is_empty() {
                self.embedding.url = url;
            }
        }
        if let Ok(url) = std::env::var(ENV_REDIS_URL) {
            if !url.is_empty() {
                self.store = StoreConfig::Redis {
                    url,
                    index: default_index_name(),
                };
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.embedding.url)
            .map_err(|e| ConfigError::Invalid(format!("embedding url: {}", e)))?;

        if let StoreConfig::Redis { url, .. } = &self.store {
            url::Url::parse(url).map_err(|e| ConfigError::Invalid(format!("redis url: {}", e)))?;
        }

        if self.search.lexical_weight + self.search.vector_weight <= f32::EPSILON {
            return Err(ConfigError::Invalid(
                "search weights must sum to a positive value".into(),
            ));
        }
        if self.search.max_limit == 0 {
            return Err(ConfigError::Invalid("max_limit must be positive".into()));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(ConfigError::Invalid("backend id must not be empty".into()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend id: {}",
                    backend.id
                )));
            }
        }

        for qualified in &self.exposure.always_exposed {
            if !qualified.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "always_exposed entry '{}' must be a server:tool qualified name",
                    qualified
                )));
            }
        }

        Ok(())
    }
}
