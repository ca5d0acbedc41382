//! In-memory [`VectorStore`] implementation for tests and embedding
//! applications.
//!
//! Units live in a `Vec` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over the units that pass the level, thread, and
//! predicate filters. Per-level search counters let callers observe which
//! partitions a query touched.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{EmbeddedUnit, Unit, UnitLevel};

use super::{ScoredUnit, SearchQuery, VectorStore};

/// In-memory store for tests and single-process use.
pub struct InMemoryStore {
    units: RwLock<Vec<EmbeddedUnit>>,
    summary_searches: AtomicUsize,
    detail_searches: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(Vec::new()),
            summary_searches: AtomicUsize::new(0),
            detail_searches: AtomicUsize::new(0),
        }
    }

    /// Number of searches run against `level` so far.
    pub fn search_count(&self, level: UnitLevel) -> usize {
        match level {
            UnitLevel::Summary => self.summary_searches.load(Ordering::SeqCst),
            UnitLevel::Detail => self.detail_searches.load(Ordering::SeqCst),
        }
    }

    /// Stored units of one thread: summary first, then details by position.
    pub fn thread_units(&self, thread_id: &str) -> Result<Vec<Unit>, StoreError> {
        let guard = self.read()?;
        let mut units: Vec<Unit> = guard
            .iter()
            .filter(|e| e.unit.thread_id == thread_id)
            .map(|e| e.unit.clone())
            .collect();
        units.sort_by_key(|u| (u.level != UnitLevel::Summary, u.position));
        Ok(units)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<EmbeddedUnit>>, StoreError> {
        self.units
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<EmbeddedUnit>>, StoreError> {
        self.units
            .write()
            .map_err(|_| StoreError::Write("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, units: &[EmbeddedUnit], _deadline: Instant) -> Result<(), StoreError> {
        let threads: HashSet<&str> = units.iter().map(|e| e.unit.thread_id.as_str()).collect();
        let mut stored = self.write()?;
        stored.retain(|e| !threads.contains(e.unit.thread_id.as_str()));
        stored.extend(units.iter().cloned());
        Ok(())
    }

    async fn search(
        &self,
        query: &SearchQuery,
        _deadline: Instant,
    ) -> Result<Vec<ScoredUnit>, StoreError> {
        match query.level {
            UnitLevel::Summary => self.summary_searches.fetch_add(1, Ordering::SeqCst),
            UnitLevel::Detail => self.detail_searches.fetch_add(1, Ordering::SeqCst),
        };
        if query.vector.is_empty() {
            return Err(StoreError::Query("empty query vector".to_string()));
        }

        let stored = self.read()?;
        let mut hits: Vec<ScoredUnit> = stored
            .iter()
            .filter(|e| e.unit.level == query.level)
            .filter(|e| {
                query
                    .thread_id
                    .as_deref()
                    .map_or(true, |t| e.unit.thread_id == t)
            })
            .filter(|e| query.predicate.matches(&e.unit.metadata))
            .map(|e| ScoredUnit {
                unit: e.unit.clone(),
                score: cosine_similarity(&query.vector, &e.vector),
            })
            .filter(|hit| query.similarity_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.unit.position.cmp(&b.unit.position))
                .then(a.unit.id.cmp(&b.unit.id))
        });
        hits.truncate(query.top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UnitMetadata, SOURCE_TYPE};
    use crate::predicate::MetadataPredicate;

    fn embedded(thread: &str, position: Option<usize>, project: &str, vector: Vec<f32>) -> EmbeddedUnit {
        let level = if position.is_some() {
            UnitLevel::Detail
        } else {
            UnitLevel::Summary
        };
        let metadata = UnitMetadata {
            project_id: project.to_string(),
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
        EmbeddedUnit { unit, vector }
    }

    fn query(level: UnitLevel, vector: Vec<f32>) -> SearchQuery {
        SearchQuery {
            vector,
            predicate: MetadataPredicate::any(),
            level,
            thread_id: None,
            top_k: 10,
            similarity_threshold: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_thread() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        store
            .upsert(
                &[
                    embedded("t1", None, "p", vec![1.0, 0.0]),
                    embedded("t1", Some(0), "p", vec![1.0, 0.0]),
                    embedded("t1", Some(1), "p", vec![1.0, 0.0]),
                    embedded("t2", None, "p", vec![0.0, 1.0]),
                ],
                now,
            )
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 4);

        store
            .upsert(&[embedded("t1", None, "p", vec![1.0, 0.0])], now)
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.thread_units("t1").unwrap().len(), 1);
        assert_eq!(store.thread_units("t2").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_filters_and_ranks() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        store
            .upsert(
                &[
                    embedded("t1", Some(0), "p", vec![1.0, 0.0]),
                    embedded("t1", Some(1), "p", vec![1.0, 0.0]),
                    embedded("t1", Some(2), "p", vec![0.6, 0.8]),
                    embedded("t2", Some(0), "q", vec![1.0, 0.0]),
                    embedded("t1", None, "p", vec![1.0, 0.0]),
                ],
                now,
            )
            .await
            .unwrap();

        let mut q = query(UnitLevel::Detail, vec![1.0, 0.0]);
        q.predicate = MetadataPredicate::project("p");
        let hits = store.search(&q, now).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["t1:0", "t1:1", "t1:2"]);

        q.similarity_threshold = Some(0.9);
        q.top_k = 1;
        let hits = store.search(&q, now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.id, "t1:0");

        assert_eq!(store.search_count(UnitLevel::Detail), 2);
        assert_eq!(store.search_count(UnitLevel::Summary), 0);
    }

    #[tokio::test]
    async fn test_thread_scope() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        store
            .upsert(
                &[
                    embedded("t1", Some(0), "p", vec![1.0, 0.0]),
                    embedded("t2", Some(0), "p", vec![1.0, 0.0]),
                ],
                now,
            )
            .await
            .unwrap();
        let mut q = query(UnitLevel::Detail, vec![1.0, 0.0]);
        q.thread_id = Some("t2".to_string());
        let hits = store.search(&q, now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.thread_id, "t2");
    }

    #[tokio::test]
    async fn test_empty_vector_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .search(&query(UnitLevel::Summary, vec![]), Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn test_poisoned_lock_surfaces_errors() {
        let store = InMemoryStore::new();
        assert!(store.is_empty().unwrap());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.units.write().unwrap();
            panic!("writer died holding the lock");
        }));
        assert!(result.is_err());

        assert!(matches!(store.len(), Err(StoreError::Unavailable(_))));
        assert!(store.is_empty().is_err());
        let err = store
            .upsert(&[embedded("t1", None, "p", vec![1.0, 0.0])], Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));
        assert!(!err.is_retryable());
    }
}
