//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is the stable interface between the
//! ingestion pipeline, the answering engine and whatever persists the
//! vectors: embed → store → nearest-neighbor query.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`reindex_all`](IndexStore::reindex_all) | Replace the whole index with a new document set |
//! | [`query`](IndexStore::query) | Top-k semantic retrieval, closest first |
//! | [`get`](IndexStore::get) | Fetch one document by kind and id |
//! | [`count`](IndexStore::count) | Number of indexed documents |
//!
//! Implementations must guarantee that a query racing a reindex sees
//! either the complete old set or the complete new set.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{IndexedDocument, SourceKind};

/// Outcome of a [`IndexStore::reindex_all`] call.
#[derive(Debug, Default)]
pub struct ReindexReport {
    pub indexed: usize,
    /// Documents dropped because they could not be embedded or written.
    pub skipped: Vec<PipelineError>,
}

/// Abstract semantic index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Clear every previously indexed document, then embed and insert
    /// `documents`. Calling this repeatedly with the same input leaves
    /// the same index behind.
    async fn reindex_all(&self, documents: Vec<IndexedDocument>) -> Result<ReindexReport>;

    /// The `k` documents nearest to `text`, closest first. An empty
    /// index or no relevant match yields an empty vector, not an error.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexedDocument>>;

    async fn get(&self, kind: SourceKind, source_id: &str) -> Result<Option<IndexedDocument>>;

    async fn count(&self) -> Result<usize>;
}
