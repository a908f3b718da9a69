//! SQLite-backed [`IndexStore`].
//!
//! One row per document in `documents`, with the embedding stored as a
//! little-endian f32 BLOB. Nearest-neighbor search is brute-force cosine
//! similarity in Rust over every stored vector.
//!
//! `reindex_all` embeds the whole batch first, then deletes and inserts
//! inside a single transaction. Under WAL, concurrent readers keep
//! seeing the previous committed set until the commit lands.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use pulse_core::embedding::{
    blob_to_vec, cosine_similarity, embed_documents, embed_one, top_k_by_score, vec_to_blob,
    Embedder,
};
use pulse_core::error::PipelineError;
use pulse_core::models::{IndexedDocument, Metadata, SourceKind};
use pulse_core::store::{IndexStore, ReindexReport};

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    min_similarity: f32,
}

/// One row of `ingest_runs`.
#[derive(Debug, Clone)]
pub struct IngestRun {
    pub started_at: i64,
    pub finished_at: i64,
    pub fetched: i64,
    pub indexed: i64,
    pub skipped: i64,
    pub malformed: i64,
    pub failed_sources: Vec<String>,
}

impl SqliteIndex {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        min_similarity: f32,
    ) -> Self {
        Self {
            pool,
            embedder,
            batch_size,
            min_similarity,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn record_ingest_run(&self, run: &IngestRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_runs (id, started_at, finished_at, fetched, indexed, skipped, malformed, failed_sources)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.fetched)
        .bind(run.indexed)
        .bind(run.skipped)
        .bind(run.malformed)
        .bind(run.failed_sources.join(","))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_ingest_run(&self) -> Result<Option<IngestRun>> {
        let row = sqlx::query(
            r#"
            SELECT started_at, finished_at, fetched, indexed, skipped, malformed, failed_sources
            FROM ingest_runs ORDER BY finished_at DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let failed: String = r.get("failed_sources");
            IngestRun {
                started_at: r.get("started_at"),
                finished_at: r.get("finished_at"),
                fetched: r.get("fetched"),
                indexed: r.get("indexed"),
                skipped: r.get("skipped"),
                malformed: r.get("malformed"),
                failed_sources: failed
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            }
        }))
    }
}

fn write_failure(doc: &IndexedDocument, err: &dyn std::fmt::Display) -> PipelineError {
    let err = PipelineError::EmbeddingWrite {
        kind: doc.kind,
        id: doc.source_id.clone(),
        message: err.to_string(),
    };
    tracing::warn!(error = %err, "skipping document");
    err
}

fn row_to_document(row: &SqliteRow) -> Option<IndexedDocument> {
    let kind: String = row.get("source_kind");
    let kind = match SourceKind::parse(&kind) {
        Some(k) => k,
        None => {
            tracing::warn!(kind = %kind, "unknown source kind in index; ignoring row");
            return None;
        }
    };
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    Some(IndexedDocument {
        kind,
        source_id: row.get("source_id"),
        text: row.get("text"),
        metadata,
    })
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn reindex_all(&self, documents: Vec<IndexedDocument>) -> Result<ReindexReport> {
        let (embedded, mut skipped) =
            embed_documents(self.embedder.as_ref(), documents, self.batch_size).await;

        let model = self.embedder.model_name().to_string();
        let now = Utc::now().timestamp();
        let mut indexed = 0usize;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;

        for (doc, vector) in embedded {
            let metadata_json = match serde_json::to_string(&doc.metadata) {
                Ok(json) => json,
                Err(e) => {
                    skipped.push(write_failure(&doc, &e));
                    continue;
                }
            };
            let inserted = sqlx::query(
                r#"
                INSERT INTO documents (id, source_kind, source_id, text, metadata_json, embedding, model, dims, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_kind, source_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(doc.kind.as_str())
            .bind(&doc.source_id)
            .bind(&doc.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&vector))
            .bind(&model)
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await;

            let result = match inserted {
                Ok(result) => result,
                Err(e) => {
                    skipped.push(write_failure(&doc, &e));
                    continue;
                }
            };
            if result.rows_affected() == 1 {
                indexed += 1;
            } else {
                tracing::warn!(kind = %doc.kind, id = %doc.source_id, "duplicate document id; keeping the first");
                skipped.push(PipelineError::EmbeddingWrite {
                    kind: doc.kind,
                    id: doc.source_id.clone(),
                    message: "duplicate id in batch".to_string(),
                });
            }
        }

        tx.commit().await?;
        Ok(ReindexReport { indexed, skipped })
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexedDocument>> {
        if k == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_one(self.embedder.as_ref(), text).await?;
        let rows = sqlx::query(
            "SELECT source_kind, source_id, text, metadata_json, embedding FROM documents",
        )
        .fetch_all(&self.pool)
        .await?;

        let scored: Vec<(f32, &SqliteRow)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (cosine_similarity(&query_vec, &blob_to_vec(&blob)), row)
            })
            .collect();

        Ok(top_k_by_score(scored, k, self.min_similarity)
            .into_iter()
            .filter_map(|(_, row)| row_to_document(row))
            .collect())
    }

    async fn get(&self, kind: SourceKind, source_id: &str) -> Result<Option<IndexedDocument>> {
        let row = sqlx::query(
            "SELECT source_kind, source_id, text, metadata_json FROM documents WHERE source_kind = ? AND source_id = ?",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().and_then(row_to_document))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
