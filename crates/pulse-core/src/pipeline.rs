//! Batch document building: link, then normalize.
//!
//! The relationship graph is built over the entire batch before any
//! record is normalized, so every tracker document sees its final parent
//! and children. Malformed records are dropped and reported, never fatal.

use crate::error::PipelineError;
use crate::link::RelationshipGraph;
use crate::models::{IndexedDocument, SourceRecord};
use crate::normalize::Normalizer;

/// Result of one [`build_documents`] pass.
#[derive(Debug, Default)]
pub struct DocumentBatch {
    pub documents: Vec<IndexedDocument>,
    /// Records that could not be normalized.
    pub malformed: Vec<PipelineError>,
}

/// Turn a batch of raw records into indexable documents.
pub fn build_documents(records: &[SourceRecord], normalizer: &Normalizer) -> DocumentBatch {
    let graph = RelationshipGraph::build(records);
    tracing::debug!(
        records = records.len(),
        linked = graph.len(),
        "relationship graph built"
    );

    let mut batch = DocumentBatch::default();
    for record in records {
        match normalizer.normalize(record, &graph) {
            Ok(doc) => batch.documents.push(doc),
            Err(e) => {
                tracing::warn!(error = %e, title = ?record.title, "dropping record");
                batch.malformed.push(e);
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn test_malformed_record_excluded() {
        let mut broken = SourceRecord::tracker_issue("ID-2", "No id", "Open", None);
        broken.id = None;
        let records = vec![
            SourceRecord::tracker_issue("ID-1", "Login bug", "Open", None),
            broken,
            SourceRecord::tracker_issue("ID-3", "Logout bug", "Done", None),
        ];

        let batch = build_documents(&records, &Normalizer::default());
        let ids: Vec<&str> = batch.documents.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["ID-1", "ID-3"]);
        assert_eq!(batch.malformed.len(), 1);
        assert!(matches!(
            batch.malformed[0],
            PipelineError::MalformedRecord {
                kind: SourceKind::Tracker,
                field: "id"
            }
        ));
    }

    #[test]
    fn test_parent_text_lists_child() {
        let records = vec![
            SourceRecord::tracker_issue("ID-1", "Parent", "In Progress", None),
            SourceRecord::tracker_issue("ID-2", "Child", "To Do", Some("ID-1")),
        ];
        let batch = build_documents(&records, &Normalizer::default());
        assert!(batch.documents[0].text.contains("ID-2"));
        assert!(batch.documents[1].text.contains("Parent: ID-1"));
    }

    #[test]
    fn test_titleless_child_is_not_linked() {
        let mut untitled = SourceRecord::tracker_issue("ID-2", "x", "Open", Some("ID-1"));
        untitled.title = None;
        let mut orphan = SourceRecord::tracker_issue("ID-3", "Card art", "To Do", Some("ID-4"));
        let mut dropped_parent = SourceRecord::tracker_issue("ID-4", "x", "Open", None);
        dropped_parent.title = Some("   ".to_string());
        orphan.body = Some("Waiting on design.".to_string());
        let records = vec![
            SourceRecord::tracker_issue("ID-1", "Login bug", "In Progress", None),
            untitled,
            orphan,
            dropped_parent,
        ];

        let batch = build_documents(&records, &Normalizer::default());
        assert_eq!(batch.malformed.len(), 2);
        let ids: Vec<&str> = batch.documents.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["ID-1", "ID-3"]);

        let parent = &batch.documents[0];
        assert!(!parent.text.contains("ID-2"));
        assert!(!parent.meta_flag("has_children"));

        let child = &batch.documents[1];
        assert!(!child.text.contains("Parent:"));
        assert_eq!(child.meta_str("parent_id"), Some("ID-4"));
    }

    #[test]
    fn test_empty_batch() {
        let batch = build_documents(&[], &Normalizer::default());
        assert!(batch.documents.is_empty());
        assert!(batch.malformed.is_empty());
    }
}
