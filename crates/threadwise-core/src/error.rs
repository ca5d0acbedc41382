//! Error taxonomy for the chunking, summarization, embedding, and retrieval
//! pipeline.
//!
//! Every error that crosses a process boundary (embedding, language model,
//! store) carries a retryability classification via `is_retryable()`, so a
//! caller can tell a timeout or rate limit apart from a permanent failure.
//!
//! | Error | Raised by | Policy |
//! |-------|-----------|--------|
//! | [`TokenizationError`] | tokenizer adapter | propagated, fatal to the unit |
//! | [`ChunkingError`] | chunker audit | unit still emitted, flagged |
//! | [`SummarizationError`] | summary strategies | absorbed by the fallback chain |
//! | [`EmbeddingError`] | [`Embedder`](crate::embedding::Embedder) | surfaced with batch boundaries |
//! | [`RetrievalError`] | [`HierarchicalRetriever`](crate::retrieve::HierarchicalRetriever) | surfaced, never retried |
//! | [`IndexError`] | [`ThreadIndexer`](crate::pipeline::ThreadIndexer) | surfaced with the thread id |

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token counting failed for the given text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tokenizer '{scheme}' failed: {message}")]
pub struct TokenizationError {
    pub scheme: String,
    pub message: String,
}

impl TokenizationError {
    pub fn new(scheme: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            message: message.into(),
        }
    }
}

/// A detail unit broke the token budget because its content had no
/// further split point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error(
        "unit {position} of thread {thread_id} holds {tokens} tokens (limit {limit}); content is unsplittable"
    )]
    Oversized {
        thread_id: String,
        position: usize,
        tokens: usize,
        limit: usize,
    },
}

/// Failure classification reported by embedding and language-model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// HTTP 429 or an equivalent quota signal.
    RateLimited,
    /// Network hiccup or 5xx; safe to retry.
    Transient,
    /// The call exceeded its deadline.
    Timeout,
    /// Bad request, auth failure, malformed response.
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::RateLimited => "rate-limited",
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// Error returned by an [`EmbeddingProvider`](crate::provider::EmbeddingProvider)
/// or [`LanguageModelProvider`](crate::provider::LanguageModelProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Permanent, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind != ProviderErrorKind::Permanent
    }
}

/// A summary strategy could not produce text. Absorbed by the
/// summarizer's fallback chain; never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("language model call failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("language model returned an empty summary")]
    EmptyResponse,
    #[error(transparent)]
    Tokenization(#[from] TokenizationError),
}

/// A batch failed to embed after exhausting retries.
///
/// `completed` holds the vectors of every batch that finished before the
/// failing one (in input order), so a caller can resume at `range.start`
/// rather than re-embedding everything.
#[derive(Debug, Error)]
#[error(
    "embedding batch {batch_index} (texts {}..{}) failed after {attempts} attempt(s): {source}",
    .range.start,
    .range.end
)]
pub struct EmbeddingError {
    pub batch_index: usize,
    pub range: Range<usize>,
    pub attempts: u32,
    pub completed: Vec<Vec<f32>>,
    #[source]
    pub source: ProviderError,
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Errors raised by a [`VectorStore`](crate::store::VectorStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("vector store query failed: {0}")]
    Query(String),
    #[error("vector store write failed: {0}")]
    Write(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Which store search a [`RetrievalError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Summary,
    Detail,
    Flat,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPhase::Summary => "summary-level",
            SearchPhase::Detail => "detail-level",
            SearchPhase::Flat => "flat detail",
        };
        f.write_str(s)
    }
}

/// A query could not be answered. The retriever never returns a partial
/// result set in place of one of these.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[source] ProviderError),
    #[error("embedding provider returned no vector for the query")]
    EmptyEmbedding,
    #[error("{phase} search failed: {source}")]
    Store {
        phase: SearchPhase,
        #[source]
        source: StoreError,
    },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}

impl RetrievalError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::Embedding(e) => e.is_retryable(),
            RetrievalError::EmptyEmbedding => false,
            RetrievalError::Store { source, .. } => source.is_retryable(),
            RetrievalError::Timeout { .. } => true,
        }
    }
}

/// Indexing a single thread failed. Carries the thread id so the caller
/// can re-ingest just that thread.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("thread {thread_id}: {source}")]
    Tokenization {
        thread_id: String,
        #[source]
        source: TokenizationError,
    },
    #[error("thread {thread_id}: {source}")]
    Embedding {
        thread_id: String,
        #[source]
        source: EmbeddingError,
    },
    #[error("thread {thread_id}: {source}")]
    Store {
        thread_id: String,
        #[source]
        source: StoreError,
    },
    #[error("thread {thread_id}: store upsert timed out after {timeout:?}")]
    Timeout { thread_id: String, timeout: Duration },
}

impl IndexError {
    pub fn thread_id(&self) -> &str {
        match self {
            IndexError::Tokenization { thread_id, .. }
            | IndexError::Embedding { thread_id, .. }
            | IndexError::Store { thread_id, .. }
            | IndexError::Timeout { thread_id, .. } => thread_id,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Tokenization { .. } => false,
            IndexError::Embedding { source, .. } => source.is_retryable(),
            IndexError::Store { source, .. } => source.is_retryable(),
            IndexError::Timeout { .. } => true,
        }
    }
}

/// Configuration failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_retryability() {
        assert!(ProviderError::rate_limited("429").is_retryable());
        assert!(ProviderError::timeout("slow").is_retryable());
        assert!(!ProviderError::permanent("bad key").is_retryable());
    }

    #[test]
    fn test_embedding_error_reports_batch_range() {
        let err = EmbeddingError {
            batch_index: 2,
            range: 20..30,
            attempts: 3,
            completed: vec![vec![0.0]; 20],
            source: ProviderError::rate_limited("too many requests"),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch 2"));
        assert!(msg.contains("20..30"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable_store_query_is_not() {
        let timeout = RetrievalError::Timeout {
            operation: "summary-level search".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        let query = RetrievalError::Store {
            phase: SearchPhase::Detail,
            source: StoreError::Query("bad filter".to_string()),
        };
        assert!(!query.is_retryable());
    }
}
