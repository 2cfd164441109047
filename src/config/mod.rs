//! Configuration management for prefrank
//!
//! TOML file with per-section settings, named profiles with partial overrides,
//! and `PREFRANK_SECTION__KEY` environment overrides.

use crate::error::{PrefrankError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub relaxation: RelaxationConfig,
    pub embedding: EmbeddingConfig,
    pub selection: SelectionConfig,
    pub diversity: DiversityConfig,
    pub ranking: RankingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

/// Candidate search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Rows fetched from the store per relaxation attempt
    pub candidate_pool_size: u32,
    /// Pre-ranking cap per make+model; 0 disables it
    pub max_per_make_model: u32,
    /// `field` or `field:direction`, e.g. "price:asc"
    pub default_sort: String,
    pub default_radius_miles: f64,
}

/// Filter relaxation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaxationConfig {
    /// Return Exhausted instead of dropping a MustHave filter
    #[serde(default)]
    pub never_relax_must_have: bool,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

/// Coverage-risk selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub min_similarity: f32,
    pub risk_aversion: f32,
    /// "max" or "sum"
    pub aggregation: String,
    /// "max", "mean" or "top_k_mean"
    #[serde(default = "default_alignment")]
    pub alignment: String,
    /// Phrase count for "top_k_mean"
    #[serde(default = "default_alignment_top_k")]
    pub alignment_top_k: usize,
}

fn default_alignment() -> String {
    "max".to_string()
}

fn default_alignment_top_k() -> usize {
    3
}

/// Diversification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityConfig {
    /// "none", "mmr" or "clustered"
    pub policy: String,
    pub mmr_lambda: f32,
    pub cluster_size: usize,
}

/// Strategy selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// "auto", "coverage_risk" or "lexical"
    pub strategy: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_lambda: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_aversion: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub never_relax_must_have: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| PrefrankError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PrefrankError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PrefrankError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrefrankError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PrefrankError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| PrefrankError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(strategy) = overrides.strategy {
            self.ranking.strategy = strategy;
        }
        if let Some(policy) = overrides.diversity_policy {
            self.diversity.policy = policy;
        }
        if let Some(lambda) = overrides.mmr_lambda {
            self.diversity.mmr_lambda = lambda;
        }
        if let Some(risk) = overrides.risk_aversion {
            self.selection.risk_aversion = risk;
        }
        if let Some(never) = overrides.never_relax_must_have {
            self.relaxation.never_relax_must_have = never;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        tracing::debug!("Applied profile {}", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PREFRANK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("PREFRANK_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__POOL_SIZE" => self.storage.pool_size = parse_value(path, value)?,
            "SEARCH__CANDIDATE_POOL_SIZE" => {
                self.search.candidate_pool_size = parse_value(path, value)?
            }
            "SEARCH__MAX_PER_MAKE_MODEL" => {
                self.search.max_per_make_model = parse_value(path, value)?
            }
            "SEARCH__DEFAULT_SORT" => self.search.default_sort = value.to_string(),
            "RELAXATION__NEVER_RELAX_MUST_HAVE" => {
                self.relaxation.never_relax_must_have = parse_value(path, value)?
            }
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "SELECTION__MIN_SIMILARITY" => self.selection.min_similarity = parse_value(path, value)?,
            "SELECTION__RISK_AVERSION" => self.selection.risk_aversion = parse_value(path, value)?,
            "SELECTION__AGGREGATION" => self.selection.aggregation = value.to_string(),
            "DIVERSITY__POLICY" => self.diversity.policy = value.to_string(),
            "DIVERSITY__MMR_LAMBDA" => self.diversity.mmr_lambda = parse_value(path, value)?,
            "RANKING__STRATEGY" => self.ranking.strategy = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Full path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage.data_dir).join(&self.storage.database_file)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PrefrankError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("prefrank").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| PrefrankError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("prefrank"))
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.prefrank"),
                database_file: "prefrank.db".to_string(),
                pool_size: 16,
                busy_timeout_ms: 5000,
            },
            search: SearchConfig {
                candidate_pool_size: 200,
                max_per_make_model: 5,
                default_sort: "price:asc".to_string(),
                default_radius_miles: 50.0,
            },
            relaxation: RelaxationConfig {
                never_relax_must_have: false,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
            },
            selection: SelectionConfig {
                min_similarity: 0.5,
                risk_aversion: 0.5,
                aggregation: "max".to_string(),
                alignment: default_alignment(),
                alignment_top_k: default_alignment_top_k(),
            },
            diversity: DiversityConfig {
                policy: "mmr".to_string(),
                mmr_lambda: 0.7,
                cluster_size: 3,
            },
            ranking: RankingConfig {
                strategy: "auto".to_string(),
            },
            profiles: HashMap::new(),
        }
    }
}
