//! Core data models used throughout Pulse.
//!
//! [`SourceRecord`] is what the upstream record sources hand to the core;
//! [`IndexedDocument`] is what the index stores and the answering engine
//! reads back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which upstream system a record came from.
///
/// Record ids are only unique within a kind, so every index key is
/// namespaced by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Tracker,
    CodeHost,
    Wiki,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Tracker => "tracker",
            SourceKind::CodeHost => "code_host",
            SourceKind::Wiki => "wiki",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tracker" => Some(SourceKind::Tracker),
            "code_host" => Some(SourceKind::CodeHost),
            "wiki" => Some(SourceKind::Wiki),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

impl PullRequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullRequestState::Open => "open",
            PullRequestState::Closed => "closed",
            PullRequestState::Merged => "merged",
        }
    }
}

/// Tracker-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerFields {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    /// Weak back-reference to another tracker record's id. May point
    /// outside the current batch.
    #[serde(default)]
    pub parent_ref: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    /// Project key. Derived from the issue key when absent.
    #[serde(default)]
    pub project: Option<String>,
}

/// Pull-request-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestFields {
    pub state: PullRequestState,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

/// Wiki-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WikiFields {
    #[serde(default)]
    pub space: Option<String>,
}

/// The per-kind half of a [`SourceRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_kind", rename_all = "snake_case")]
pub enum RecordDetails {
    Tracker(TrackerFields),
    CodeHost(PullRequestFields),
    Wiki(WikiFields),
}

/// A raw record produced by an upstream source before normalization.
///
/// `id` and `title` are optional because upstream payloads are not
/// trusted; a record missing either is rejected by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub details: RecordDetails,
}

impl SourceRecord {
    pub fn kind(&self) -> SourceKind {
        match self.details {
            RecordDetails::Tracker(_) => SourceKind::Tracker,
            RecordDetails::CodeHost(_) => SourceKind::CodeHost,
            RecordDetails::Wiki(_) => SourceKind::Wiki,
        }
    }

    /// The record id if present and non-blank.
    pub fn key(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }

    /// The record title if present and non-blank.
    pub fn summary(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }

    pub fn tracker(&self) -> Option<&TrackerFields> {
        match &self.details {
            RecordDetails::Tracker(t) => Some(t),
            _ => None,
        }
    }

    /// Convenience constructor for a tracker issue.
    pub fn tracker_issue(id: &str, title: &str, status: &str, parent_ref: Option<&str>) -> Self {
        Self {
            id: Some(id.to_string()),
            title: Some(title.to_string()),
            body: None,
            url: None,
            last_updated: None,
            details: RecordDetails::Tracker(TrackerFields {
                status: Some(status.to_string()),
                parent_ref: parent_ref.map(str::to_string),
                ..Default::default()
            }),
        }
    }
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Scalar metadata attached to an [`IndexedDocument`].
///
/// Used for citation and post-filtering only, never for semantic matching.
pub type Metadata = Map<String, Value>;

/// The unit stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub kind: SourceKind,
    /// Id of the originating record, unique within `kind`.
    pub source_id: String,
    /// Denormalized natural-language rendering that gets embedded.
    pub text: String,
    pub metadata: Metadata,
}

impl IndexedDocument {
    /// Read a string metadata field.
    pub fn meta_str(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).and_then(Value::as_str)
    }

    /// Read a boolean metadata field, `false` when absent.
    pub fn meta_flag(&self, field: &str) -> bool {
        self.metadata
            .get(field)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
