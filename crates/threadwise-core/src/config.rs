//! Tuning parameters for the chunker, summarizer, embedder, and retriever.
//!
//! Every field is optional when deserialized; missing fields take the
//! documented defaults. Each struct is immutable once handed to the
//! component that owns it. Call `validate()` before use; the application
//! crate does so right after parsing its TOML file.

use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// ThreadChunker parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum tokens per detail unit, context marker and overlap included.
    pub chunk_size: usize,
    /// Maximum tokens carried from one unit into the next.
    pub chunk_overlap: usize,
    /// Named tokenizer scheme: `cl100k_base`, `o200k_base`, `words` or `chars`.
    pub tokenizer: String,
    pub context: ContextMarkerConfig,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            tokenizer: "cl100k_base".to_string(),
            context: ContextMarkerConfig::default(),
        }
    }
}

impl ChunkerConfig {
    /// Tokens reserved at the top of every non-first unit.
    pub fn reserved_tokens(&self) -> usize {
        let marker = if self.context.enabled {
            self.context.max_tokens
        } else {
            0
        };
        marker + self.chunk_overlap
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError("chunking.chunk_size must be > 0".to_string()));
        }
        if self.reserved_tokens() >= self.chunk_size {
            return Err(ConfigError(format!(
                "chunking.context.max_tokens + chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
                self.reserved_tokens(),
                self.chunk_size
            )));
        }
        if StrftimeItems::new(&self.context.date_format).any(|i| matches!(i, Item::Error)) {
            return Err(ConfigError(format!(
                "chunking.context.date_format '{}' is not a valid strftime pattern",
                self.context.date_format
            )));
        }
        Ok(())
    }
}

/// Thread-context marker injected at the top of every unit after the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextMarkerConfig {
    pub enabled: bool,
    /// Hard ceiling on the marker's token count.
    pub max_tokens: usize,
    /// `chrono` format string for message dates.
    pub date_format: String,
}

impl Default for ContextMarkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: 100,
            date_format: "%b %d".to_string(),
        }
    }
}

/// ThreadSummarizer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub model: String,
    pub temperature: f32,
    /// Upper bound on summary tokens, also passed to the language model.
    pub max_tokens: usize,
    /// Token window of the language model.
    pub context_window: usize,
    /// Tokens kept free for the instruction text and response framing.
    pub prompt_reserve: usize,
    /// Share of the prompt budget given to the start of the thread; the
    /// rest goes to the most recent messages.
    pub head_ratio: f32,
    pub timeout_secs: u64,
    /// Attempts per summary before falling back to the next strategy.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.0,
            max_tokens: 300,
            context_window: 8192,
            prompt_reserve: 500,
            head_ratio: 0.3,
            timeout_secs: 60,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl SummarizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    /// Tokens available for thread content in the prompt.
    pub fn prompt_budget(&self) -> usize {
        self.context_window
            .saturating_sub(self.max_tokens)
            .saturating_sub(self.prompt_reserve)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError("summarizer.max_tokens must be > 0".to_string()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError("summarizer.max_retries must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.head_ratio) {
            return Err(ConfigError(
                "summarizer.head_ratio must be in [0.0, 1.0]".to_string(),
            ));
        }
        if self.prompt_budget() == 0 {
            return Err(ConfigError(
                "summarizer.context_window must exceed max_tokens + prompt_reserve".to_string(),
            ));
        }
        Ok(())
    }
}

/// Embedder batching and retry parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    /// Attempts per batch before the error is surfaced.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 100,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            timeout_secs: 30,
        }
    }
}

impl EmbedderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError("embedding.batch_size must be >= 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError("embedding.max_retries must be >= 1".to_string()));
        }
        if self.dimensions == 0 {
            return Err(ConfigError("embedding.dimensions must be > 0".to_string()));
        }
        Ok(())
    }
}

/// HierarchicalRetriever parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub summary_top_k: usize,
    pub detail_top_k: usize,
    /// Minimum cosine similarity for a summary to select its thread.
    pub similarity_threshold: f32,
    /// Optional floor for detail hits inside matched threads.
    pub detail_similarity_threshold: Option<f32>,
    /// `false` runs one flat detail-level search instead of two phases.
    pub hierarchical: bool,
    /// Result count for flat mode.
    pub flat_top_k: usize,
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            summary_top_k: 10,
            detail_top_k: 5,
            similarity_threshold: 0.7,
            detail_similarity_threshold: None,
            hierarchical: true,
            flat_top_k: 10,
            timeout_secs: 30,
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.summary_top_k == 0 || self.detail_top_k == 0 || self.flat_top_k == 0 {
            return Err(ConfigError(
                "retrieval top-k values must be >= 1".to_string(),
            ));
        }
        let thresholds = [
            Some(self.similarity_threshold),
            self.detail_similarity_threshold,
        ];
        for t in thresholds.into_iter().flatten() {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError(
                    "retrieval similarity thresholds must be in [0.0, 1.0]".to_string(),
                ));
            }
        }
        Ok(())
    }
}
