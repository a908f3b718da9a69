//! Failure kinds of the ingestion and answering pipeline.
//!
//! None of these ever terminate the process. Ingestion failures are
//! logged and the affected unit (source, record, document) is skipped;
//! request-path failures are turned into user-facing strings.

use thiserror::Error;

use crate::models::SourceKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// An upstream source was unreachable or rate-limited past its retries.
    #[error("failed to fetch records from source '{source_name}': {message}")]
    SourceFetch {
        source_name: String,
        message: String,
    },

    /// A document could not be embedded or written to the index.
    #[error("failed to index {kind} document '{id}': {message}")]
    EmbeddingWrite {
        kind: SourceKind,
        id: String,
        message: String,
    },

    /// The generative model call failed or produced nothing.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The index could not be queried.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// A record is missing one of its identifying fields.
    #[error("malformed {kind} record: missing {field}")]
    MalformedRecord {
        kind: SourceKind,
        field: &'static str,
    },
}

impl PipelineError {
    pub fn source_fetch(source_name: &str, err: &anyhow::Error) -> Self {
        PipelineError::SourceFetch {
            source_name: source_name.to_string(),
            message: format!("{:#}", err),
        }
    }
}
