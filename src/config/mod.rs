
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

/// Top-level application configuration.
///
/// Loaded once at process start; clients built from it are passed by
/// reference afterwards and never re-read the environment per call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// API key for the embedding/generation backend, sourced from
    /// `CHATFORGE_MODEL_API_KEY` at load time.
    #[serde(skip)]
    pub model_api_key: String,
    /// API key for the hosted crawl service, sourced from
    /// `CHATFORGE_CRAWL_API_KEY` at load time.
    #[serde(skip)]
    pub crawl_api_key: String,
}

/// Embedding + generation model endpoint (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub chat_model: String,
    pub embed_batch_size: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            chat_model: "gpt-4o-mini".to_string(),
            embed_batch_size: 64,
        }
    }
}

/// Hosted crawl service endpoint and polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlConfig {
    pub base_url: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.firecrawl.dev".to_string(),
            poll_interval_secs: 5,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be nonzero)")]
    InvalidPort(u16),
    #[error("Invalid embed batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid crawl poll interval: {0} (must be between 1 and 60 seconds)")]
    InvalidPollInterval(u64),
    #[error("Invalid crawl timeout: {0} (must be between 10 and 3600 seconds)")]
    InvalidCrawlTimeout(u64),
    #[error("Invalid chunk size: {0} (must be between 100 and 8192 characters)")]
    InvalidChunkSize(usize),
    #[error("Overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from `<config_dir>/config.toml`, falling back to
    /// defaults when the file does not exist. API keys are read from the
    /// environment here and nowhere else.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Config::default()
        };

        config.base_dir = config_dir.as_ref().to_path_buf();
        config.model_api_key = std::env::var("CHATFORGE_MODEL_API_KEY").unwrap_or_default();
        config.crawl_api_key = std::env::var("CHATFORGE_CRAWL_API_KEY").unwrap_or_default();

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Default config directory: `~/.local/share/chatforge` (platform
    /// equivalent via `dirs`).
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf> {
        let dir = dirs::data_dir()
            .context("Could not determine platform data directory")?
            .join("chatforge");
        Ok(dir)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.model.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.model.base_url.clone()))?;
        Url::parse(&self.crawl.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.crawl.base_url.clone()))?;

        if self.model.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.embedding_model.clone()));
        }
        if self.model.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.chat_model.clone()));
        }
        if self.model.embed_batch_size == 0 || self.model.embed_batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.model.embed_batch_size));
        }
        if !(64..=4096).contains(&self.model.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.model.embedding_dimension,
            ));
        }

        if !(1..=60).contains(&self.crawl.poll_interval_secs) {
            return Err(ConfigError::InvalidPollInterval(
                self.crawl.poll_interval_secs,
            ));
        }
        if !(10..=3600).contains(&self.crawl.timeout_secs) {
            return Err(ConfigError::InvalidCrawlTimeout(self.crawl.timeout_secs));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        if !(100..=8192).contains(&self.chunking.max_characters) {
            return Err(ConfigError::InvalidChunkSize(self.chunking.max_characters));
        }
        if self.chunking.overlap_characters >= self.chunking.max_characters {
            return Err(ConfigError::OverlapTooLarge(
                self.chunking.overlap_characters,
                self.chunking.max_characters,
            ));
        }

        Ok(())
    }

    /// Path for the SQLite database.
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("metadata.db")
    }

    /// Path for the LanceDB vector index directory.
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    #[inline]
    pub fn model_base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.model.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.model.base_url.clone()))
    }

    #[inline]
    pub fn crawl_base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.crawl.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.crawl.base_url.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            crawl: CrawlConfig::default(),
            server: ServerConfig::default(),
            chunking: ChunkConfig::default(),
            base_dir: PathBuf::new(),
            model_api_key: String::new(),
            crawl_api_key: String::new(),
        }
    }
}

/// Print the effective configuration (keys redacted).
#[inline]
pub fn show_config(config: &Config) {
    println!("base_dir: {}", config.base_dir.display());
    println!("model.base_url: {}", config.model.base_url);
    println!("model.embedding_model: {}", config.model.embedding_model);
    println!(
        "model.embedding_dimension: {}",
        config.model.embedding_dimension
    );
    println!("model.chat_model: {}", config.model.chat_model);
    println!("crawl.base_url: {}", config.crawl.base_url);
    println!("crawl.timeout_secs: {}", config.crawl.timeout_secs);
    println!("server: {}:{}", config.server.host, config.server.port);
    println!(
        "chunking: max {} chars, overlap {}",
        config.chunking.max_characters, config.chunking.overlap_characters
    );
    println!(
        "model_api_key: {}",
        if config.model_api_key.is_empty() {
            "(unset)"
        } else {
            "(set)"
        }
    );
    println!(
        "crawl_api_key: {}",
        if config.crawl_api_key.is_empty() {
            "(unset)"
        } else {
            "(set)"
        }
    );
}
