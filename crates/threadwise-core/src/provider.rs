//! Capability traits for the external services the pipeline calls.
//!
//! Implementations live outside this crate (HTTP clients, local models,
//! test fakes). Every call receives a deadline; callers additionally wrap
//! each call in [`tokio::time::timeout`], so an implementation that ignores
//! the deadline still cannot stall the pipeline.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ProviderError;

/// Turns texts into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        dimensions: usize,
        deadline: Instant,
    ) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// A single text-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Generates text from a prompt.
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<String, ProviderError>;
}
