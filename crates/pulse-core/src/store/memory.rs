//! In-memory [`IndexStore`] for tests and the `--in-memory` server mode.
//!
//! Holds an immutable snapshot behind `std::sync::RwLock`. A reindex
//! embeds the whole new set first and only then swaps the snapshot, so
//! readers never observe a partially written index. Query is brute-force
//! cosine similarity over every stored vector.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, embed_documents, embed_one, top_k_by_score, Embedder};
use crate::error::PipelineError;
use crate::models::{IndexedDocument, SourceKind};

use super::{IndexStore, ReindexReport};

struct Entry {
    doc: IndexedDocument,
    vector: Vec<f32>,
}

pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    min_similarity: f32,
    snapshot: RwLock<Arc<Vec<Entry>>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize, min_similarity: f32) -> Self {
        Self {
            embedder,
            batch_size,
            min_similarity,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn current(&self) -> Result<Arc<Vec<Entry>>> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| anyhow!("index lock poisoned"))
    }
}

#[async_trait]
impl IndexStore for InMemoryIndex {
    async fn reindex_all(&self, documents: Vec<IndexedDocument>) -> Result<ReindexReport> {
        let (embedded, mut skipped) =
            embed_documents(self.embedder.as_ref(), documents, self.batch_size).await;

        let mut seen: HashSet<(SourceKind, String)> = HashSet::new();
        let mut entries = Vec::with_capacity(embedded.len());
        for (doc, vector) in embedded {
            if !seen.insert((doc.kind, doc.source_id.clone())) {
                tracing::warn!(kind = %doc.kind, id = %doc.source_id, "duplicate document id; keeping the first");
                skipped.push(PipelineError::EmbeddingWrite {
                    kind: doc.kind,
                    id: doc.source_id,
                    message: "duplicate id in batch".to_string(),
                });
                continue;
            }
            entries.push(Entry { doc, vector });
        }
        let indexed = entries.len();

        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("index lock poisoned"))?;
        *guard = Arc::new(entries);

        Ok(ReindexReport { indexed, skipped })
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexedDocument>> {
        let snapshot = self.current()?;
        if snapshot.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_one(self.embedder.as_ref(), text).await?;
        let scored: Vec<(f32, &Entry)> = snapshot
            .iter()
            .map(|e| (cosine_similarity(&query_vec, &e.vector), e))
            .collect();

        Ok(top_k_by_score(scored, k, self.min_similarity)
            .into_iter()
            .map(|(_, e)| e.doc.clone())
            .collect())
    }

    async fn get(&self, kind: SourceKind, source_id: &str) -> Result<Option<IndexedDocument>> {
        let snapshot = self.current()?;
        Ok(snapshot
            .iter()
            .find(|e| e.doc.kind == kind && e.doc.source_id == source_id)
            .map(|e| e.doc.clone()))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.current()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use anyhow::bail;

    /// Bag-of-letters embedder: texts sharing letters score close.
    struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            26
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for c in t.to_ascii_lowercase().bytes() {
                        if c.is_ascii_lowercase() {
                            v[(c - b'a') as usize] += 1.0;
                        }
                    }
                    v
                })
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("offline")
        }
    }

    /// Letter embedder that stalls on multi-text batches, so a reindex
    /// stays in flight while single-text queries go through.
    struct StallingEmbedder;

    #[async_trait]
    impl Embedder for StallingEmbedder {
        fn model_name(&self) -> &str {
            "stalling"
        }
        fn dims(&self) -> usize {
            26
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.len() > 1 {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            LetterEmbedder.embed(texts).await
        }
    }

    fn doc(id: &str, text: &str) -> IndexedDocument {
        IndexedDocument {
            kind: SourceKind::Tracker,
            source_id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
        }
    }

    fn index() -> InMemoryIndex {
        InMemoryIndex::new(Arc::new(LetterEmbedder), 16, 0.0)
    }

    #[tokio::test]
    async fn test_empty_index_query_is_empty() {
        let store = index();
        assert!(store.query("anything", 5).await.unwrap().is_empty());
        // Clearing an empty index is fine.
        let report = store.reindex_all(Vec::new()).await.unwrap();
        assert_eq!(report.indexed, 0);
    }

    #[tokio::test]
    async fn test_query_orders_closest_first() {
        let store = index();
        store
            .reindex_all(vec![doc("A", "zzzz qqqq"), doc("B", "login bug")])
            .await
            .unwrap();
        let hits = store.query("login bug status", 2).await.unwrap();
        assert_eq!(hits[0].source_id, "B");
        let top = store.query("login bug status", 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let store = index();
        let docs = vec![doc("A", "alpha"), doc("B", "beta")];
        for _ in 0..3 {
            store.reindex_all(docs.clone()).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 2);
        let hits = store.query("alpha beta", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_reindex_replaces_previous_set() {
        let store = index();
        store.reindex_all(vec![doc("A", "alpha")]).await.unwrap();
        store.reindex_all(vec![doc("B", "beta")]).await.unwrap();
        assert!(store.get(SourceKind::Tracker, "A").await.unwrap().is_none());
        assert!(store.get(SourceKind::Tracker, "B").await.unwrap().is_some());
        assert!(store.get(SourceKind::Wiki, "B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unrelated_query_returns_nothing() {
        let store = index();
        store.reindex_all(vec![doc("A", "aaaa")]).await.unwrap();
        // No shared letters: similarity 0.0 is not above the threshold.
        assert!(store.query("zzz", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_first() {
        let store = index();
        let report = store
            .reindex_all(vec![doc("ID-1", "first"), doc("ID-1", "second")])
            .await
            .unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.query("first second", 8).await.unwrap().len(), 1);
        let kept = store.get(SourceKind::Tracker, "ID-1").await.unwrap().unwrap();
        assert_eq!(kept.text, "first");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_during_reindex_sees_one_whole_set() {
        let store = Arc::new(InMemoryIndex::new(Arc::new(StallingEmbedder), 16, -1.0));
        let old_set = vec![doc("A1", "alpha"), doc("A2", "apple"), doc("A3", "anchor")];
        let new_set = vec![doc("B1", "beta"), doc("B2", "banana"), doc("B3", "bridge")];
        store.reindex_all(old_set).await.unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.reindex_all(new_set).await })
        };

        let mut observed = Vec::new();
        while !writer.is_finished() {
            let hits = store.query("a b", 10).await.unwrap();
            observed.push(hits.iter().map(|d| d.source_id.clone()).collect::<Vec<_>>());
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        writer.await.unwrap().unwrap();
        observed.push(
            store
                .query("a b", 10)
                .await
                .unwrap()
                .into_iter()
                .map(|d| d.source_id)
                .collect(),
        );

        assert!(observed.len() > 1);
        for ids in &observed {
            assert_eq!(ids.len(), 3, "partial set observed: {:?}", ids);
            let all_old = ids.iter().all(|id| id.starts_with('A'));
            let all_new = ids.iter().all(|id| id.starts_with('B'));
            assert!(all_old || all_new, "mixed set observed: {:?}", ids);
        }
        assert!(observed[0].iter().all(|id| id.starts_with('A')));
        assert!(observed.last().unwrap().iter().all(|id| id.starts_with('B')));
    }

    #[tokio::test]
    async fn test_embedding_failures_are_skipped() {
        let store = InMemoryIndex::new(Arc::new(BrokenEmbedder), 4, 0.0);
        let report = store
            .reindex_all(vec![doc("A", "alpha"), doc("B", "beta")])
            .await
            .unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
