use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use genorch_cache::{CacheSettings, Fingerprinter};

use crate::orchestrator::OrchestratorSettings;

/// Longest accepted cache TTL (ten years)
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct GenorchConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,
}

/// Artifact cache configuration
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// JSON snapshot file backing the cache
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Lifetime of a cached artifact in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached artifacts; 0 disables caching
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".genorch/cache.json")
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_entries() -> usize {
    50
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

/// Generation run configuration
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    /// Deadline for one compute call; unset means no deadline
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Computes allowed to run at once; 0 means unbounded
    #[serde(default)]
    pub max_concurrent: usize,

    /// How long a finished task stays readable
    #[serde(default)]
    pub grace_period_ms: u64,
}

/// Config fingerprint configuration
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FingerprintConfig {
    /// "rolling" (default) or "sha256"
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Top-level config fields that never affect the artifact
    #[serde(default)]
    pub ignored_fields: Vec<String>,
}

fn default_algorithm() -> String {
    "rolling".to_string()
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            ignored_fields: Vec::new(),
        }
    }
}

/// One config file as written: only the keys it actually sets
///
/// Layers are applied over the defaults in priority order, so a later file
/// can restore a value an earlier one changed.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    #[serde(default)]
    pub cache: CacheLayer,

    #[serde(default)]
    pub generation: GenerationLayer,

    #[serde(default)]
    pub fingerprint: FingerprintLayer,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CacheLayer {
    pub path: Option<PathBuf>,
    pub ttl_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationLayer {
    pub timeout_secs: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub grace_period_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FingerprintLayer {
    pub algorithm: Option<String>,
    pub ignored_fields: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid range in {field}: {value} (valid range: {valid_range})")]
    InvalidRange {
        field: String,
        value: u64,
        valid_range: String,
    },

    #[error("Invalid value in {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GenorchConfig {
    /// Apply every key the layer sets, leaving the rest untouched
    pub fn merge(&mut self, layer: &ConfigLayer) {
        if let Some(path) = &layer.cache.path {
            self.cache.path = path.clone();
        }
        if let Some(ttl_secs) = layer.cache.ttl_secs {
            self.cache.ttl_secs = ttl_secs;
        }
        if let Some(max_entries) = layer.cache.max_entries {
            self.cache.max_entries = max_entries;
        }

        if let Some(timeout_secs) = layer.generation.timeout_secs {
            self.generation.timeout_secs = Some(timeout_secs);
        }
        if let Some(max_concurrent) = layer.generation.max_concurrent {
            self.generation.max_concurrent = max_concurrent;
        }
        if let Some(grace_period_ms) = layer.generation.grace_period_ms {
            self.generation.grace_period_ms = grace_period_ms;
        }

        if let Some(algorithm) = &layer.fingerprint.algorithm {
            self.fingerprint.algorithm = algorithm.clone();
        }
        if let Some(ignored_fields) = &layer.fingerprint.ignored_fields {
            self.fingerprint.ignored_fields = ignored_fields.clone();
        }
    }

    pub fn generate_default_config() -> String {
        r#"# genorch configuration file

[cache]
path = ".genorch/cache.json"
ttl_secs = 86400
# 0 disables caching
max_entries = 50

[generation]
# timeout_secs = 300
# 0 means unbounded
max_concurrent = 0
grace_period_ms = 0

[fingerprint]
# "rolling" or "sha256"
algorithm = "rolling"
# ignored_fields = ["request_id"]
"#
        .to_string()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.merge(&Self::load_layer(path)?);
        Ok(config)
    }

    pub fn load_layer<P: AsRef<Path>>(path: P) -> Result<ConfigLayer, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Get the user config file path (~/.config/genorch/config.toml)
    pub fn get_user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/genorch/config.toml"))
    }

    /// Get the current directory config file path (./genorch.toml)
    pub fn get_current_config_path() -> PathBuf {
        PathBuf::from("./genorch.toml")
    }

    /// Write the default config to the user config path unless one exists
    pub fn ensure_user_config_exists() -> Result<PathBuf> {
        let user_config_path = Self::get_user_config_path()
            .ok_or_else(|| anyhow!("Could not determine home directory"))?;

        if !user_config_path.exists() {
            if let Some(parent) = user_config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            std::fs::write(&user_config_path, Self::generate_default_config())?;
            tracing::info!("Created user config file at: {}", user_config_path.display());
        }

        Ok(user_config_path)
    }

    /// Load and merge configs with priority:
    /// 1. User config (~/.config/genorch/config.toml) - base
    /// 2. Current directory (./genorch.toml) - overrides
    pub fn load_with_merged_configs() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(user_path) = Self::get_user_config_path() {
            if user_path.exists() {
                match Self::load_layer(&user_path) {
                    Ok(user_layer) => {
                        config.merge(&user_layer);
                        tracing::debug!("Loaded user config from: {}", user_path.display());
                    }
                    Err(e) => tracing::warn!("Ignoring user config {}: {}", user_path.display(), e),
                }
            }
        }

        let current_path = Self::get_current_config_path();
        if current_path.exists() {
            let current_layer = Self::load_layer(&current_path)?;
            config.merge(&current_layer);
            tracing::debug!("Loaded current directory config from: {}", current_path.display());
        }

        Ok(config)
    }

    /// Load a single explicit file, or the merged user/current configs
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)
                .map_err(|e| anyhow!("Failed to load config file {}: {}", path.display(), e))?,
            None => Self::load_with_merged_configs()?,
        };

        let env_vars: HashMap<String, String> = std::env::vars().collect();
        config.apply_env_vars(&env_vars)?;
        config.validate()?;

        Ok(config)
    }

    pub fn apply_env_vars(&mut self, env_vars: &HashMap<String, String>) -> Result<()> {
        for (key, value) in env_vars {
            if let Some(config_key) = key.strip_prefix("GENORCH_") {
                match config_key {
                    "CACHE_PATH" => self.cache.path = PathBuf::from(value),
                    "CACHE_TTL_SECS" => {
                        self.cache.ttl_secs = value
                            .parse()
                            .map_err(|_| anyhow!("Invalid ttl_secs value: {}", value))?;
                    }
                    "CACHE_MAX_ENTRIES" => {
                        self.cache.max_entries = value
                            .parse()
                            .map_err(|_| anyhow!("Invalid max_entries value: {}", value))?;
                    }
                    "GENERATION_TIMEOUT_SECS" => {
                        self.generation.timeout_secs = Some(
                            value
                                .parse()
                                .map_err(|_| anyhow!("Invalid timeout_secs value: {}", value))?,
                        );
                    }
                    "GENERATION_MAX_CONCURRENT" => {
                        self.generation.max_concurrent = value
                            .parse()
                            .map_err(|_| anyhow!("Invalid max_concurrent value: {}", value))?;
                    }
                    "FINGERPRINT_ALGORITHM" => self.fingerprint.algorithm = value.clone(),
                    "FINGERPRINT_IGNORED_FIELDS" => {
                        self.fingerprint.ignored_fields = value
                            .split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect();
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs == 0 || self.cache.ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::InvalidRange {
                field: "cache.ttl_secs".to_string(),
                value: self.cache.ttl_secs,
                valid_range: format!("1-{}", MAX_TTL_SECS),
            });
        }

        if self.generation.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidRange {
                field: "generation.timeout_secs".to_string(),
                value: 0,
                valid_range: "1 or more".to_string(),
            });
        }

        if !matches!(self.fingerprint.algorithm.as_str(), "rolling" | "sha256") {
            return Err(ConfigError::InvalidValue {
                field: "fingerprint.algorithm".to_string(),
                value: self.fingerprint.algorithm.clone(),
            });
        }

        Ok(())
    }

    pub fn to_orchestrator_settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        self.validate()?;

        let ttl = chrono::Duration::try_seconds(self.cache.ttl_secs as i64).ok_or_else(|| {
            ConfigError::InvalidRange {
                field: "cache.ttl_secs".to_string(),
                value: self.cache.ttl_secs,
                valid_range: format!("1-{}", MAX_TTL_SECS),
            }
        })?;

        Ok(OrchestratorSettings {
            cache: CacheSettings {
                ttl,
                max_size: self.cache.max_entries,
            },
            task_grace_period: Duration::from_millis(self.generation.grace_period_ms),
            generation_timeout: self.generation.timeout_secs.map(Duration::from_secs),
            max_concurrent: self.generation.max_concurrent,
        })
    }

    pub fn to_fingerprinter(&self) -> Result<Fingerprinter, ConfigError> {
        let fingerprinter = Fingerprinter::from_name(&self.fingerprint.algorithm).map_err(|_| {
            ConfigError::InvalidValue {
                field: "fingerprint.algorithm".to_string(),
                value: self.fingerprint.algorithm.clone(),
            }
        })?;

        Ok(fingerprinter.ignore_fields(self.fingerprint.ignored_fields.iter().cloned()))
    }
}
