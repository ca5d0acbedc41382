//! Configuration loading.
//!
//! The `tw` binary reads one TOML file with a section per component:
//!
//! ```toml
//! [chunking]
//! chunk_size = 512
//! chunk_overlap = 50
//! tokenizer = "cl100k_base"
//!
//! [chunking.context]
//! max_tokens = 100
//!
//! [summarizer]
//! max_tokens = 300
//! max_retries = 3
//!
//! [retrieval]
//! similarity_threshold = 0.7
//!
//! [embedding]
//! dimensions = 1536
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Every field is optional. A missing file yields the defaults. The
//! loaded configuration is always validated before it is returned.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use threadwise_core::config::{ChunkerConfig, EmbedderConfig, RetrievalConfig, SummarizerConfig};
use threadwise_core::tokenizer::tokenizer_for;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkerConfig,
    pub summarizer: SummarizerConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbedderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.chunking
            .validate()
            .context("invalid [chunking] section")?;
        tokenizer_for(&self.chunking.tokenizer).context("invalid [chunking] section")?;
        self.summarizer
            .validate()
            .context("invalid [summarizer] section")?;
        self.retrieval
            .validate()
            .context("invalid [retrieval] section")?;
        self.embedding
            .validate()
            .context("invalid [embedding] section")?;
        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level must not be empty");
        }
        Ok(())
    }

    /// Render the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config: {}", path.display()))
}
