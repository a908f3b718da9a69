//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend
//! implements, plus pure helpers for vector serialization, similarity
//! and fault-tolerant batch embedding.
//!
//! Concrete providers (OpenAI, Ollama, hashing) live in the `pulse`
//! app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::IndexedDocument;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts. The output has one vector per input, in
    /// input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[text.to_string()]).await?;
    match vectors.pop() {
        Some(v) if vectors.is_empty() => Ok(v),
        _ => bail!("embedder returned an unexpected number of vectors"),
    }
}

/// Embed `docs` in batches of `batch_size`.
///
/// A batch that fails (or returns the wrong number of vectors) is
/// retried one document at a time so only the failing documents are
/// dropped. Returns the embedded documents in input order, plus one
/// [`PipelineError::EmbeddingWrite`] per dropped document.
pub async fn embed_documents(
    embedder: &dyn Embedder,
    docs: Vec<IndexedDocument>,
    batch_size: usize,
) -> (Vec<(IndexedDocument, Vec<f32>)>, Vec<PipelineError>) {
    let batch_size = batch_size.max(1);
    let mut embedded = Vec::with_capacity(docs.len());
    let mut skipped = Vec::new();

    let mut remaining = docs.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<IndexedDocument> = remaining.by_ref().take(batch_size).collect();
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();

        match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                embedded.extend(batch.into_iter().zip(vectors));
            }
            outcome => {
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, size = batch.len(), "batch embedding failed; retrying per document");
                }
                for doc in batch {
                    match embed_one(embedder, &doc.text).await {
                        Ok(v) => embedded.push((doc, v)),
                        Err(e) => {
                            let err = PipelineError::EmbeddingWrite {
                                kind: doc.kind,
                                id: doc.source_id.clone(),
                                message: format!("{:#}", e),
                            };
                            tracing::warn!(error = %err, "skipping document");
                            skipped.push(err);
                        }
                    }
                }
            }
        }
    }

    (embedded, skipped)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use pulse_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Keep the `k` highest-scoring candidates strictly above `min_score`,
/// best first. Ties keep their input order.
pub fn top_k_by_score<T>(mut scored: Vec<(f32, T)>, k: usize, min_score: f32) -> Vec<(f32, T)> {
    scored.retain(|(score, _)| *score > min_score);
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
