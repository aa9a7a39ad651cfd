//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::knowledge::RetrievalOptions;

/// Environment variables consulted for the embedding API key, in order
pub const API_KEY_VARS: [&str; 2] = ["SYLLABUS_API_KEY", "OPENAI_API_KEY"];

/// Syllabus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file; defaults to `syllabus.db` in the config directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API (`/embeddings` is appended)
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub seed_count: usize,
    pub max_depth: usize,
    pub max_concepts: usize,
    pub min_similarity: f32,
    /// 0 disables the cap
    pub max_examples_per_concept: usize,
    pub timeout_ms: u64,
    pub context_budget_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            seed_count: 5,
            max_depth: 2,
            max_concepts: 15,
            min_similarity: 0.0,
            max_examples_per_concept: 2,
            timeout_ms: 10_000,
            context_budget_tokens: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub lock_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(API_KEY_VARS
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty())))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "Embedding API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetrievalConfig {
    /// Retrieval options for a query, before per-query overrides
    pub fn options(&self) -> RetrievalOptions {
        let examples_cap = match self.max_examples_per_concept {
            0 => None,
            n => Some(n),
        };

        RetrievalOptions::default()
            .with_seed_count(self.seed_count)
            .with_max_depth(self.max_depth)
            .with_max_concepts(self.max_concepts)
            .with_min_similarity(self.min_similarity)
            .with_max_examples_per_concept(examples_cap)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }
}

impl ResolverConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SYLLABUS_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("syllabus")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Resolved database file path
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("syllabus.db")),
        }
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.embedding.enforce_env_only()?;

        if !(-1.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(anyhow!("retrieval.min_similarity must be between -1.0 and 1.0"));
        }
        if self.retrieval.timeout_ms == 0 {
            return Err(anyhow!("retrieval.timeout_ms must be positive"));
        }
        if self.embedding.endpoint.trim().is_empty() {
            return Err(anyhow!("embedding.endpoint must not be empty"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "database.path" => Ok(self.database_path()?.display().to_string()),

            "embedding.endpoint" => Ok(self.embedding.endpoint.clone()),
            "embedding.model" => Ok(self.embedding.model.clone()),
            "embedding.timeout_secs" => Ok(self.embedding.timeout_secs.to_string()),

            "retrieval.seed_count" => Ok(self.retrieval.seed_count.to_string()),
            "retrieval.max_depth" => Ok(self.retrieval.max_depth.to_string()),
            "retrieval.max_concepts" => Ok(self.retrieval.max_concepts.to_string()),
            "retrieval.min_similarity" => Ok(self.retrieval.min_similarity.to_string()),
            "retrieval.max_examples_per_concept" => {
                Ok(self.retrieval.max_examples_per_concept.to_string())
            }
            "retrieval.timeout_ms" => Ok(self.retrieval.timeout_ms.to_string()),
            "retrieval.context_budget_tokens" => {
                Ok(self.retrieval.context_budget_tokens.to_string())
            }

            "resolver.lock_timeout_ms" => Ok(self.resolver.lock_timeout_ms.to_string()),

            // API key (special handling - show redacted)
            "embedding.api_key" | "api_key" => match self.embedding.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use SYLLABUS_API_KEY or OPENAI_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `syllabus config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "database.path" => {
                let value = value.trim();
                self.database.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            "embedding.endpoint" => {
                let value = value.trim().trim_end_matches('/');
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(anyhow!("Embedding endpoint must be an http(s) URL: {}", value));
                }
                self.embedding.endpoint = value.to_string();
            }
            "embedding.model" => {
                if value.trim().is_empty() {
                    return Err(anyhow!("Embedding model must not be empty"));
                }
                self.embedding.model = value.trim().to_string();
            }
            "embedding.timeout_secs" => {
                self.embedding.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            "retrieval.seed_count" => {
                self.retrieval.seed_count = value
                    .parse()
                    .with_context(|| format!("Invalid seed_count value: {}", value))?;
            }
            "retrieval.max_depth" => {
                self.retrieval.max_depth = value
                    .parse()
                    .with_context(|| format!("Invalid max_depth value: {}", value))?;
            }
            "retrieval.max_concepts" => {
                self.retrieval.max_concepts = value
                    .parse()
                    .with_context(|| format!("Invalid max_concepts value: {}", value))?;
            }
            "retrieval.min_similarity" => {
                let min: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid min_similarity value: {}", value))?;
                if !(-1.0..=1.0).contains(&min) {
                    return Err(anyhow!("Minimum similarity must be between -1.0 and 1.0"));
                }
                self.retrieval.min_similarity = min;
            }
            "retrieval.max_examples_per_concept" => {
                self.retrieval.max_examples_per_concept = value
                    .parse()
                    .with_context(|| format!("Invalid max_examples_per_concept value: {}", value))?;
            }
            "retrieval.timeout_ms" => {
                let timeout: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_ms value: {}", value))?;
                if timeout == 0 {
                    return Err(anyhow!("Retrieval timeout must be positive"));
                }
                self.retrieval.timeout_ms = timeout;
            }
            "retrieval.context_budget_tokens" => {
                self.retrieval.context_budget_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid context_budget_tokens value: {}", value))?;
            }

            "resolver.lock_timeout_ms" => {
                self.resolver.lock_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid lock_timeout_ms value: {}", value))?;
            }

            // API key cannot be set via config
            "embedding.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the SYLLABUS_API_KEY or OPENAI_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `syllabus config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "database.path",
            "embedding.endpoint",
            "embedding.model",
            "embedding.timeout_secs",
            "embedding.api_key",
            "retrieval.seed_count",
            "retrieval.max_depth",
            "retrieval.max_concepts",
            "retrieval.min_similarity",
            "retrieval.max_examples_per_concept",
            "retrieval.timeout_ms",
            "retrieval.context_budget_tokens",
            "resolver.lock_timeout_ms",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
