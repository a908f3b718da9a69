//! Local JSON file source.
//!
//! Reads a JSON array of records, each tagged with `source_kind`. Used
//! for offline seeding and fixtures:
//!
//! ```json
//! [
//!   { "source_kind": "tracker", "id": "ID-1", "title": "Login bug", "status": "In Progress" },
//!   { "source_kind": "wiki", "id": "42", "title": "Auth runbook", "body": "<p>...</p>" }
//! ]
//! ```
//!
//! The file is parsed element by element so one bad entry does not
//! discard the rest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use pulse_core::models::SourceRecord;

use crate::traits::RecordSource;

pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    fn name(&self) -> &str {
        "json"
    }

    fn source_type(&self) -> &str {
        "json"
    }

    fn description(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read records file: {}", self.path.display()))?;
        parse_records(&content)
            .with_context(|| format!("Failed to parse records file: {}", self.path.display()))
    }
}

pub fn parse_records(content: &str) -> Result<Vec<SourceRecord>> {
    let entries: Vec<Value> = serde_json::from_str(content)?;
    let mut records = Vec::with_capacity(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<SourceRecord>(entry) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(position, error = %e, "skipping unreadable record"),
        }
    }
    Ok(records)
}
