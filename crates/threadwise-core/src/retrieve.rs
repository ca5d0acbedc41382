//! Two-phase hierarchical retrieval.
//!
//! The retriever answers a query through the [`VectorStore`] trait and an
//! [`Embedder`], with no persistence of its own. Each query is stateless.
//!
//! # Algorithm
//!
//! 1. Embed the query text once.
//! 2. Search the summary level under the caller's predicate, keeping up to
//!    `summary_top_k` threads whose summary scores ≥ `similarity_threshold`.
//!    No match means an empty result; there is no unfiltered fallback.
//! 3. For each matched thread, concurrently search its detail units under
//!    the same predicate, up to `detail_top_k` each.
//! 4. Merge and sort by score (desc), position (asc), thread id (asc).
//!
//! With `hierarchical = false`, steps 2 and 3 are replaced by one flat
//! detail-level search of `flat_top_k` under `similarity_threshold`, and the
//! summary level is never touched.
//!
//! Every embedding and store call runs under `timeout_secs`. Any failure or
//! timeout fails the whole query; a partial result set is never returned.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{ConfigError, RetrievalError, SearchPhase};
use crate::models::{Unit, UnitLevel};
use crate::predicate::MetadataPredicate;
use crate::store::{ScoredUnit, SearchQuery, VectorStore};

/// A detail unit answering a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedUnit {
    pub unit: Unit,
    /// Cosine similarity of the unit to the query.
    pub score: f32,
    /// Score of the thread's summary in phase 1; `None` in flat mode.
    pub summary_score: Option<f32>,
}

/// Query-time orchestrator over the two unit levels.
pub struct HierarchicalRetriever {
    embedder: Arc<Embedder>,
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
}

impl HierarchicalRetriever {
    pub fn new(
        embedder: Arc<Embedder>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            embedder,
            store,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Answer `text` under `predicate`. A blank query returns no results
    /// without calling any provider.
    #[tracing::instrument(skip(self, predicate), fields(hierarchical = self.config.hierarchical))]
    pub async fn query(
        &self,
        text: &str,
        predicate: &MetadataPredicate,
    ) -> Result<Vec<RetrievedUnit>, RetrievalError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embed(text).await?;

        let mut results = if self.config.hierarchical {
            self.two_phase(vector, predicate).await?
        } else {
            self.flat(vector, predicate).await?
        };

        results.sort_by(compare_results);
        debug!(results = results.len(), "query answered");
        Ok(results)
    }

    async fn two_phase(
        &self,
        vector: Vec<f32>,
        predicate: &MetadataPredicate,
    ) -> Result<Vec<RetrievedUnit>, RetrievalError> {
        let threshold = self.config.similarity_threshold;
        let summary_query = SearchQuery {
            vector,
            predicate: predicate.clone(),
            level: UnitLevel::Summary,
            thread_id: None,
            top_k: self.config.summary_top_k,
            similarity_threshold: Some(threshold),
        };
        let summaries = self.search(&summary_query, SearchPhase::Summary).await?;

        let mut seen = HashSet::new();
        let matched: Vec<(String, f32)> = summaries
            .into_iter()
            .filter(|hit| hit.unit.level == UnitLevel::Summary && hit.score >= threshold)
            .filter(|hit| seen.insert(hit.unit.thread_id.clone()))
            .map(|hit| (hit.unit.thread_id, hit.score))
            .collect();
        debug!(threads = matched.len(), "summary phase matched");
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let vector = summary_query.vector;
        let detail_queries: Vec<(SearchQuery, f32)> = matched
            .into_iter()
            .map(|(thread_id, summary_score)| {
                let query = SearchQuery {
                    vector: vector.clone(),
                    predicate: predicate.clone(),
                    level: UnitLevel::Detail,
                    thread_id: Some(thread_id),
                    top_k: self.config.detail_top_k,
                    similarity_threshold: self.config.detail_similarity_threshold,
                };
                (query, summary_score)
            })
            .collect();

        let per_thread = try_join_all(detail_queries.iter().map(|(query, summary_score)| async move {
            let hits = self.search(query, SearchPhase::Detail).await?;
            let thread_id = query.thread_id.as_deref();
            Ok::<_, RetrievalError>(
                hits.into_iter()
                    .filter(|hit| Some(hit.unit.thread_id.as_str()) == thread_id)
                    .map(|hit| RetrievedUnit {
                        unit: hit.unit,
                        score: hit.score,
                        summary_score: Some(*summary_score),
                    })
                    .collect::<Vec<_>>(),
            )
        }))
        .await?;

        Ok(per_thread.into_iter().flatten().collect())
    }

    async fn flat(
        &self,
        vector: Vec<f32>,
        predicate: &MetadataPredicate,
    ) -> Result<Vec<RetrievedUnit>, RetrievalError> {
        let query = SearchQuery {
            vector,
            predicate: predicate.clone(),
            level: UnitLevel::Detail,
            thread_id: None,
            top_k: self.config.flat_top_k,
            similarity_threshold: Some(self.config.similarity_threshold),
        };
        let hits = self.search(&query, SearchPhase::Flat).await?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedUnit {
                unit: hit.unit,
                score: hit.score,
                summary_score: None,
            })
            .collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, self.embedder.embed_query(text)).await {
            Ok(Ok(vector)) if vector.is_empty() => Err(RetrievalError::EmptyEmbedding),
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(RetrievalError::Embedding(e)),
            Err(_) => Err(RetrievalError::Timeout {
                operation: "query embedding".to_string(),
                timeout,
            }),
        }
    }

    async fn search(
        &self,
        query: &SearchQuery,
        phase: SearchPhase,
    ) -> Result<Vec<ScoredUnit>, RetrievalError> {
        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout(timeout, self.store.search(query, deadline)).await {
            Ok(result) => result.map_err(|source| RetrievalError::Store { phase, source }),
            Err(_) => Err(RetrievalError::Timeout {
                operation: format!("{} search", phase),
                timeout,
            }),
        }
    }
}

/// Score desc, then position asc (earlier in thread wins), then thread id.
fn compare_results(a: &RetrievedUnit, b: &RetrievedUnit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.unit.position.cmp(&b.unit.position))
        .then_with(|| a.unit.thread_id.cmp(&b.unit.thread_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedderConfig;
    use crate::error::{ProviderError, StoreError};
    use crate::models::{EmbeddedUnit, UnitMetadata, SOURCE_TYPE};
    use crate::provider::EmbeddingProvider;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Constant;

    #[async_trait]
    impl EmbeddingProvider for Constant {
        async fn embed(
            &self,
            texts: &[String],
            _model: &str,
            _dimensions: usize,
            _deadline: Instant,
        ) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    enum DetailFault {
        None,
        Fail(&'static str),
        Stall(&'static str),
    }

    /// Returns fixed hits; detail searches for one thread can fail or hang.
    struct Scripted {
        summaries: Vec<(&'static str, f32)>,
        details: Vec<(&'static str, usize, f32)>,
        fault: DetailFault,
    }

    #[async_trait]
    impl VectorStore for Scripted {
        async fn upsert(&self, _: &[EmbeddedUnit], _: Instant) -> Result<(), StoreError> {
            Ok(())
        }

        async fn search(
            &self,
            query: &SearchQuery,
            _deadline: Instant,
        ) -> Result<Vec<ScoredUnit>, StoreError> {
            if query.level == UnitLevel::Summary {
                return Ok(self
                    .summaries
                    .iter()
                    .map(|&(thread, score)| hit(thread, None, score))
                    .collect());
            }
            let thread = query.thread_id.as_deref().unwrap_or_default();
            match self.fault {
                DetailFault::Fail(t) if t == thread => {
                    return Err(StoreError::Query(format!("shard for {} offline", t)))
                }
                DetailFault::Stall(t) if t == thread => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                _ => {}
            }
            Ok(self
                .details
                .iter()
                .filter(|(t, _, _)| *t == thread)
                .map(|&(t, position, score)| hit(t, Some(position), score))
                .collect())
        }
    }

    fn hit(thread: &str, position: Option<usize>, score: f32) -> ScoredUnit {
        let level = if position.is_some() {
            UnitLevel::Detail
        } else {
            UnitLevel::Summary
        };
        let metadata = UnitMetadata {
            project_id: "p".to_string(),
            source_type: SOURCE_TYPE.to_string(),
            thread_id: thread.to_string(),
            sender: None,
            date: None,
            subject: None,
            source_message_ids: Vec::new(),
            level,
            position,
            thread_context: None,
            oversized: false,
        };
        let unit = match position {
            Some(p) => Unit::detail(thread, p, format!("{} detail {}", thread, p), 3, 0, 0, metadata),
            None => Unit::summary(thread, format!("{} summary", thread), 2, metadata),
        };
        ScoredUnit { unit, score }
    }

    fn retriever(store: Scripted) -> HierarchicalRetriever {
        let embedder = Embedder::new(
            Arc::new(Constant),
            EmbedderConfig {
                dimensions: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let config = RetrievalConfig {
            timeout_secs: 5,
            ..Default::default()
        };
        HierarchicalRetriever::new(Arc::new(embedder), Arc::new(store), config).unwrap()
    }

    fn two_threads(fault: DetailFault) -> Scripted {
        Scripted {
            summaries: vec![("t-a", 0.9), ("t-b", 0.8)],
            details: vec![
                ("t-a", 1, 0.8),
                ("t-b", 0, 0.8),
                ("t-b", 2, 0.95),
                ("t-a", 0, 0.8),
            ],
            fault,
        }
    }

    #[tokio::test]
    async fn test_equal_scores_ordered_by_position_then_thread() {
        let results = retriever(two_threads(DetailFault::None))
            .query("budget", &MetadataPredicate::any())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["t-b:2", "t-a:0", "t-b:0", "t-a:1"]);
        assert_eq!(results[0].summary_score, Some(0.8));
        assert_eq!(results[1].summary_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_one_failed_detail_search_fails_query() {
        let err = retriever(two_threads(DetailFault::Fail("t-b")))
            .query("budget", &MetadataPredicate::any())
            .await
            .unwrap_err();
        match err {
            RetrievalError::Store { phase, source } => {
                assert_eq!(phase, SearchPhase::Detail);
                assert!(matches!(source, StoreError::Query(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_detail_search_times_out() {
        let err = retriever(two_threads(DetailFault::Stall("t-a")))
            .query("budget", &MetadataPredicate::any())
            .await
            .unwrap_err();
        match err {
            RetrievalError::Timeout { operation, timeout } => {
                assert_eq!(operation, "detail-level search");
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_compare_results_prefers_earlier_position() {
        let a = RetrievedUnit {
            unit: hit("t-a", Some(3), 0.5).unit,
            score: 0.5,
            summary_score: None,
        };
        let b = RetrievedUnit {
            unit: hit("t-b", Some(1), 0.5).unit,
            score: 0.5,
            summary_score: None,
        };
        assert_eq!(compare_results(&b, &a), Ordering::Less);
        assert_eq!(compare_results(&a, &a), Ordering::Equal);
    }
}
