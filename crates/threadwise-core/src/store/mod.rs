//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the only contact the pipeline has with
//! persistence: it writes embedded units and runs filtered similarity
//! searches. The store owns indexing and durability.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::models::{EmbeddedUnit, Unit, UnitLevel};
use crate::predicate::MetadataPredicate;

/// A similarity search over one level of the store.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    /// Pre-filter, applied before any similarity is computed.
    pub predicate: MetadataPredicate,
    pub level: UnitLevel,
    /// Restrict the search to one thread.
    pub thread_id: Option<String>,
    pub top_k: usize,
    /// Drop hits scoring below this value.
    pub similarity_threshold: Option<f32>,
}

/// A unit returned by a search with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredUnit {
    pub unit: Unit,
    pub score: f32,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Replace every stored unit of each thread in the call |
/// | [`search`](VectorStore::search) | Filtered top-k similarity search, score descending |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write `units`. For each thread present in `units`, previously stored
    /// units of that thread are removed first: re-ingestion is a full replace.
    async fn upsert(&self, units: &[EmbeddedUnit], deadline: Instant) -> Result<(), StoreError>;

    /// Run `query`, returning at most `top_k` hits sorted by score descending.
    async fn search(
        &self,
        query: &SearchQuery,
        deadline: Instant,
    ) -> Result<Vec<ScoredUnit>, StoreError>;
}
