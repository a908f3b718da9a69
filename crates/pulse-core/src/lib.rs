//! # Pulse Core
//!
//! The retrieval-augmented pipeline behind Pulse, free of any runtime,
//! database or HTTP dependency:
//!
//! - [`models`]: raw [`SourceRecord`](models::SourceRecord)s and indexed documents
//! - [`link`]: two-pass parent/child resolution for tracker issues
//! - [`normalize`]: one record in, one indexable document out
//! - [`pipeline`]: link + normalize a whole ingestion batch
//! - [`embedding`]: the [`Embedder`](embedding::Embedder) trait and vector helpers
//! - [`store`]: the [`IndexStore`](store::IndexStore) trait and an in-memory index
//! - [`generate`], [`prompt`], [`answer`]: grounded answer generation
//! - [`policy`]: project membership and blocker rules
//! - [`error`]: the pipeline's failure taxonomy

pub mod answer;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod link;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod prompt;
pub mod store;
