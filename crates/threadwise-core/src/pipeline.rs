//! Indexing pipeline: chunk, summarize, embed, and store whole threads.
//!
//! A thread is always written as a complete unit set (one summary plus
//! every detail unit) so stored positions never mix chunker runs.
//! Threads are independent, so [`ThreadIndexer::index_threads`] processes
//! them concurrently; one thread failing does not affect the others.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::chunk::ThreadChunker;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::models::{EmailThread, EmbeddedUnit};
use crate::store::VectorStore;
use crate::summarize::ThreadSummarizer;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// What indexing one thread produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub thread_id: String,
    pub detail_units: usize,
    /// Strategy that wrote the summary (`language_model`, `extractive`, `empty`).
    pub summary_strategy: String,
    /// Detail units flagged as over the token budget.
    pub oversized: usize,
}

/// Runs the full write path for threads.
pub struct ThreadIndexer {
    chunker: ThreadChunker,
    summarizer: ThreadSummarizer,
    embedder: Arc<Embedder>,
    store: Arc<dyn VectorStore>,
    store_timeout: Duration,
}

impl ThreadIndexer {
    pub fn new(
        chunker: ThreadChunker,
        summarizer: ThreadSummarizer,
        embedder: Arc<Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chunker,
            summarizer,
            embedder,
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Index one thread, replacing whatever the store held for it.
    #[tracing::instrument(skip_all, fields(thread_id = %thread.id, project_id = %project_id))]
    pub async fn index_thread(
        &self,
        thread: &EmailThread,
        project_id: &str,
    ) -> Result<IndexReport, IndexError> {
        let thread_id = thread.id.clone();

        let details = self
            .chunker
            .chunk(thread, project_id)
            .map_err(|source| IndexError::Tokenization {
                thread_id: thread_id.clone(),
                source,
            })?;
        let summary = self.summarizer.summarize_outcome(thread, project_id).await;

        let detail_units = details.len();
        let oversized = details.iter().filter(|u| u.metadata.oversized).count();

        let mut units = Vec::with_capacity(detail_units + 1);
        units.push(summary.unit);
        units.extend(details);

        let texts: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|source| IndexError::Embedding {
                thread_id: thread_id.clone(),
                source,
            })?;

        let embedded: Vec<EmbeddedUnit> = units
            .into_iter()
            .zip(vectors)
            .map(|(unit, vector)| EmbeddedUnit { unit, vector })
            .collect();

        let deadline = Instant::now() + self.store_timeout;
        match tokio::time::timeout(self.store_timeout, self.store.upsert(&embedded, deadline)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(IndexError::Store {
                    thread_id: thread_id.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(IndexError::Timeout {
                    thread_id: thread_id.clone(),
                    timeout: self.store_timeout,
                })
            }
        }

        info!(
            detail_units,
            oversized,
            summary_strategy = %summary.strategy,
            "indexed thread"
        );
        Ok(IndexReport {
            thread_id,
            detail_units,
            summary_strategy: summary.strategy,
            oversized,
        })
    }

    /// Index many threads with at most `concurrency` in flight. Results
    /// come back in input order.
    pub async fn index_threads(
        &self,
        threads: &[EmailThread],
        project_id: &str,
        concurrency: usize,
    ) -> Vec<Result<IndexReport, IndexError>> {
        let mut results: Vec<(usize, Result<IndexReport, IndexError>)> =
            stream::iter(threads.iter().enumerate())
                .map(|(i, thread)| async move { (i, self.index_thread(thread, project_id).await) })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }
}
