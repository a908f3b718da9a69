//! Record normalization: one [`SourceRecord`] in, one [`IndexedDocument`] out.
//!
//! The normalizer renders each record as a short natural-language block
//! (the text that gets embedded) and extracts scalar metadata for
//! citation and post-filtering. Bodies are cut to a per-kind character
//! budget so the grounding prompt stays bounded downstream.
//!
//! Only a missing `id` or `title` rejects a record. Every other missing
//! field degrades to a placeholder (`unassigned`, `unknown`).
//!
//! # Example
//!
//! ```rust
//! use pulse_core::link::RelationshipGraph;
//! use pulse_core::models::SourceRecord;
//! use pulse_core::normalize::Normalizer;
//!
//! let record = SourceRecord::tracker_issue("ID-1", "Login bug", "In Progress", None);
//! let graph = RelationshipGraph::build(std::slice::from_ref(&record));
//! let doc = Normalizer::default().normalize(&record, &graph).unwrap();
//! assert_eq!(doc.meta_str("key"), Some("ID-1"));
//! assert!(doc.text.contains("Status: In Progress"));
//! ```

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::error::PipelineError;
use crate::link::RelationshipGraph;
use crate::models::{
    IndexedDocument, Metadata, PullRequestFields, RecordDetails, SourceKind, SourceRecord,
    TrackerFields, WikiFields,
};
use crate::policy::{project_from_key, BlockerPolicy};

/// Appended to a body that was cut to its budget.
pub const TRUNCATION_MARKER: &str = "...";

const UNASSIGNED: &str = "unassigned";
const UNKNOWN: &str = "unknown";

/// Per-kind body budgets, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TruncationLimits {
    #[serde(default = "default_issue_description")]
    pub issue_description: usize,
    #[serde(default = "default_pull_request_body")]
    pub pull_request_body: usize,
    #[serde(default = "default_wiki_body")]
    pub wiki_body: usize,
}

fn default_issue_description() -> usize {
    500
}
fn default_pull_request_body() -> usize {
    500
}
fn default_wiki_body() -> usize {
    2000
}

impl Default for TruncationLimits {
    fn default() -> Self {
        Self {
            issue_description: default_issue_description(),
            pull_request_body: default_pull_request_body(),
            wiki_body: default_wiki_body(),
        }
    }
}

/// Converts raw records into indexable documents.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    limits: TruncationLimits,
    blockers: BlockerPolicy,
}

impl Normalizer {
    pub fn new(limits: TruncationLimits, blockers: BlockerPolicy) -> Self {
        Self { limits, blockers }
    }

    pub fn limits(&self) -> &TruncationLimits {
        &self.limits
    }

    /// Normalize one record.
    ///
    /// `graph` supplies resolved parent/child links for tracker issues;
    /// it is ignored for other kinds.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MalformedRecord`] when `id` or `title` is missing
    /// or blank.
    pub fn normalize(
        &self,
        record: &SourceRecord,
        graph: &RelationshipGraph,
    ) -> Result<IndexedDocument, PipelineError> {
        let kind = record.kind();
        let id = record
            .key()
            .ok_or(PipelineError::MalformedRecord { kind, field: "id" })?;
        let title = record
            .summary()
            .ok_or(PipelineError::MalformedRecord {
                kind,
                field: "title",
            })?;

        let updated = record
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let body = record.body.as_deref().unwrap_or("");

        let mut metadata = Metadata::new();
        metadata.insert("source_kind".into(), kind.as_str().into());
        metadata.insert("key".into(), id.into());
        metadata.insert("title".into(), title.into());
        metadata.insert("updated".into(), updated.clone().into());
        if let Some(url) = &record.url {
            metadata.insert("url".into(), url.clone().into());
        }

        let text = match &record.details {
            RecordDetails::Tracker(fields) => {
                self.render_tracker(id, title, &updated, body, fields, graph, &mut metadata)
            }
            RecordDetails::CodeHost(fields) => {
                self.render_pull_request(id, title, &updated, body, fields, &mut metadata)
            }
            RecordDetails::Wiki(fields) => {
                self.render_wiki(title, &updated, body, fields, &mut metadata)
            }
        };

        Ok(IndexedDocument {
            kind,
            source_id: id.to_string(),
            text,
            metadata,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn render_tracker(
        &self,
        id: &str,
        title: &str,
        updated: &str,
        body: &str,
        fields: &TrackerFields,
        graph: &RelationshipGraph,
        metadata: &mut Metadata,
    ) -> String {
        let status = fields.status.as_deref().unwrap_or(UNKNOWN);
        let assignee = fields.assignee.as_deref().unwrap_or(UNASSIGNED);
        let project = fields
            .project
            .as_deref()
            .or_else(|| project_from_key(id))
            .map(str::to_string);
        let is_blocker = self.blockers.is_blocker(fields, title, body);
        let parent = graph.parent_of(id);
        let children = graph.children_of(id);

        let mut text = String::new();
        let _ = writeln!(text, "Issue: {}", id);
        let _ = writeln!(text, "Summary: {}", title);
        let _ = writeln!(text, "Status: {}", status);
        let _ = writeln!(text, "Updated: {}", updated);
        let _ = writeln!(text, "Assignee: {}", assignee);
        if let Some(issue_type) = &fields.issue_type {
            let _ = writeln!(text, "Type: {}", issue_type);
        }
        if !fields.labels.is_empty() {
            let _ = writeln!(text, "Labels: {}", fields.labels.join(", "));
        }
        if is_blocker {
            let _ = writeln!(text, "Blocked: yes");
        }
        if let Some(parent) = &parent {
            let _ = writeln!(
                text,
                "Parent: {} - {} [{}]",
                parent.id, parent.summary, parent.status
            );
        }
        if !children.is_empty() {
            let _ = writeln!(text, "Is a parent of:");
            for child in children {
                let _ = writeln!(text, "- {}: {} [{}]", child.id, child.summary, child.status);
            }
        }
        let _ = write!(
            text,
            "Description: {}",
            truncate_body(body, self.limits.issue_description)
        );

        metadata.insert("status".into(), status.into());
        metadata.insert("assignee".into(), assignee.into());
        if let Some(project) = project {
            metadata.insert("project".into(), project.into());
        }
        let parent_id = fields
            .parent_ref
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if let Some(parent_id) = parent_id {
            metadata.insert("parent_id".into(), parent_id.into());
        }
        metadata.insert("has_children".into(), Value::Bool(!children.is_empty()));
        metadata.insert("is_blocker".into(), Value::Bool(is_blocker));

        text
    }

    fn render_pull_request(
        &self,
        id: &str,
        title: &str,
        updated: &str,
        body: &str,
        fields: &PullRequestFields,
        metadata: &mut Metadata,
    ) -> String {
        let author = fields.author.as_deref().unwrap_or(UNKNOWN);

        let mut text = String::new();
        let _ = writeln!(text, "Pull Request: {}", id);
        if let Some(repo) = &fields.repository {
            let _ = writeln!(text, "Repository: {}", repo);
        }
        let _ = writeln!(text, "Title: {}", title);
        let _ = writeln!(text, "State: {}", fields.state.as_str());
        let _ = writeln!(text, "Author: {}", author);
        let _ = writeln!(text, "Updated: {}", updated);
        let _ = write!(
            text,
            "Description: {}",
            truncate_body(body, self.limits.pull_request_body)
        );

        metadata.insert("status".into(), fields.state.as_str().into());
        metadata.insert("state".into(), fields.state.as_str().into());
        metadata.insert("author".into(), author.into());
        if let Some(repo) = &fields.repository {
            metadata.insert("repository".into(), repo.clone().into());
        }

        text
    }

    fn render_wiki(
        &self,
        title: &str,
        updated: &str,
        body: &str,
        fields: &WikiFields,
        metadata: &mut Metadata,
    ) -> String {
        let space = fields.space.as_deref().unwrap_or(UNKNOWN);
        let plain = strip_markup(body);

        let mut text = String::new();
        let _ = writeln!(text, "Wiki Page: {}", title);
        let _ = writeln!(text, "Space: {}", space);
        let _ = writeln!(text, "Updated: {}", updated);
        let _ = write!(text, "Content: {}", truncate_body(&plain, self.limits.wiki_body));

        metadata.insert("space".into(), space.into());

        text
    }
}

/// Cut `body` to at most `limit` characters, appending
/// [`TRUNCATION_MARKER`] when anything was removed.
///
/// ```rust
/// use pulse_core::normalize::truncate_body;
///
/// assert_eq!(truncate_body("abcdef", 3), "abc...");
/// assert_eq!(truncate_body("abc", 3), "abc");
/// ```
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}

/// Reduce wiki storage markup to plain text: drop tags, decode the
/// common entities, collapse whitespace.
pub fn strip_markup(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"));

    let without_tags = tag.replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    space.replace_all(&decoded, " ").trim().to_string()
}

/// The body portion of a rendered document (everything after the final
/// `Description: ` / `Content: ` label).
pub fn body_portion(doc: &IndexedDocument) -> &str {
    let label = match doc.kind {
        SourceKind::Wiki => "Content: ",
        _ => "Description: ",
    };
    doc.text
        .rfind(label)
        .map(|i| &doc.text[i + label.len()..])
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PullRequestState, SourceRecord};
    use chrono::TimeZone;

    fn normalize_one(record: &SourceRecord) -> Result<IndexedDocument, PipelineError> {
        let graph = RelationshipGraph::build(std::slice::from_ref(record));
        Normalizer::default().normalize(record, &graph)
    }

    #[test]
    fn test_tracker_rendering_and_metadata() {
        let mut record = SourceRecord::tracker_issue("ID-1", "Login bug", "In Progress", None);
        record.url = Some("https://acme.atlassian.net/browse/ID-1".into());
        record.last_updated = Some(chrono::Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        record.body = Some("Users cannot log in".into());

        let doc = normalize_one(&record).unwrap();
        assert_eq!(doc.kind, SourceKind::Tracker);
        assert_eq!(doc.source_id, "ID-1");
        assert!(doc.text.starts_with("Issue: ID-1\nSummary: Login bug\n"));
        assert!(doc.text.contains("Assignee: unassigned"));
        assert!(doc.text.contains("Updated: 2025-03-01T12:00:00+00:00"));
        assert!(doc.text.ends_with("Description: Users cannot log in"));
        assert!(!doc.text.contains("Parent:"));

        assert_eq!(doc.meta_str("key"), Some("ID-1"));
        assert_eq!(doc.meta_str("status"), Some("In Progress"));
        assert_eq!(doc.meta_str("project"), Some("ID"));
        assert_eq!(doc.meta_str("source_kind"), Some("tracker"));
        assert!(!doc.meta_flag("has_children"));
        assert!(!doc.meta_flag("is_blocker"));
    }

    #[test]
    fn test_parent_and_children_clauses() {
        let records = vec![
            SourceRecord::tracker_issue("ID-2", "Session token fix", "To Do", Some("ID-1")),
            SourceRecord::tracker_issue("ID-1", "Auth epic", "In Progress", None),
        ];
        let graph = RelationshipGraph::build(&records);
        let normalizer = Normalizer::default();

        let child = normalizer.normalize(&records[0], &graph).unwrap();
        assert!(child
            .text
            .contains("Parent: ID-1 - Auth epic [In Progress]"));
        assert_eq!(child.meta_str("parent_id"), Some("ID-1"));

        let parent = normalizer.normalize(&records[1], &graph).unwrap();
        assert!(parent
            .text
            .contains("Is a parent of:\n- ID-2: Session token fix [To Do]"));
        assert!(parent.meta_flag("has_children"));
    }

    #[test]
    fn test_unresolved_parent_has_no_clause() {
        let record = SourceRecord::tracker_issue("ID-2", "Orphan", "Open", Some("ID-404"));
        let doc = normalize_one(&record).unwrap();
        assert!(!doc.text.contains("Parent:"));
        assert_eq!(doc.meta_str("parent_id"), Some("ID-404"));
    }

    #[test]
    fn test_issue_description_truncated_to_limit() {
        let mut record = SourceRecord::tracker_issue("ID-3", "Long", "Open", None);
        record.body = Some("x".repeat(1200));
        let doc = normalize_one(&record).unwrap();
        let body = body_portion(&doc);
        assert_eq!(body.chars().count(), 500 + TRUNCATION_MARKER.len());
        assert!(body.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_short_body_not_marked() {
        let mut record = SourceRecord::tracker_issue("ID-4", "Short", "Open", None);
        record.body = Some("y".repeat(500));
        let doc = normalize_one(&record).unwrap();
        assert_eq!(body_portion(&doc), "y".repeat(500));
    }

    #[test]
    fn test_truncation_counts_characters() {
        assert_eq!(truncate_body("ééééé", 2), "éé...");
        assert_eq!(truncate_body("", 10), "");
    }

    #[test]
    fn test_wiki_markup_stripped_and_truncated() {
        let record = SourceRecord {
            id: Some("98304".into()),
            title: Some("Release plan".into()),
            body: Some(format!("<p>Q3 &amp; Q4</p>\n\n<ul><li>{}</li></ul>", "z".repeat(3000))),
            url: None,
            last_updated: None,
            details: RecordDetails::Wiki(WikiFields {
                space: Some("ENG".into()),
            }),
        };
        let doc = normalize_one(&record).unwrap();
        assert!(doc.text.contains("Space: ENG"));
        let body = body_portion(&doc);
        assert!(body.starts_with("Q3 & Q4 zzz"));
        assert_eq!(body.chars().count(), 2000 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_pull_request_rendering() {
        let record = SourceRecord {
            id: Some("acme/api#42".into()),
            title: Some("Retry on 429".into()),
            body: None,
            url: Some("https://github.com/acme/api/pull/42".into()),
            last_updated: None,
            details: RecordDetails::CodeHost(PullRequestFields {
                state: PullRequestState::Merged,
                author: None,
                repository: Some("acme/api".into()),
            }),
        };
        let doc = normalize_one(&record).unwrap();
        assert!(doc.text.contains("State: merged"));
        assert!(doc.text.contains("Author: unknown"));
        assert!(doc.text.ends_with("Description: "));
        assert_eq!(doc.meta_str("state"), Some("merged"));
        assert_eq!(doc.meta_str("url"), Some("https://github.com/acme/api/pull/42"));
    }

    #[test]
    fn test_missing_id_or_title_is_malformed() {
        let mut record = SourceRecord::tracker_issue("ID-5", "Title", "Open", None);
        record.id = None;
        match normalize_one(&record) {
            Err(PipelineError::MalformedRecord { field, .. }) => assert_eq!(field, "id"),
            other => panic!("expected malformed record, got {:?}", other),
        }

        let mut record = SourceRecord::tracker_issue("ID-5", "", "Open", None);
        record.title = Some("   ".into());
        match normalize_one(&record) {
            Err(PipelineError::MalformedRecord { field, .. }) => assert_eq!(field, "title"),
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_blocker_annotation() {
        let normalizer = Normalizer::new(
            TruncationLimits::default(),
            BlockerPolicy::new(vec!["blocker".into()], vec!["Blocked".into()], Vec::new()),
        );
        let record = SourceRecord::tracker_issue("WL-9", "Payments down", "Blocked", None);
        let graph = RelationshipGraph::build(std::slice::from_ref(&record));
        let doc = normalizer.normalize(&record, &graph).unwrap();
        assert!(doc.text.contains("Blocked: yes"));
        assert!(doc.meta_flag("is_blocker"));
    }

    #[test]
    fn test_missing_status_placeholder() {
        let mut record = SourceRecord::tracker_issue("ID-6", "No status", "x", None);
        if let RecordDetails::Tracker(fields) = &mut record.details {
            fields.status = None;
        }
        let doc = normalize_one(&record).unwrap();
        assert!(doc.text.contains("Status: unknown"));
    }
}
