//! Project-membership and blocker policies.
//!
//! Both are explicit configuration rather than heuristics buried in the
//! normalizer or the prompt:
//!
//! - An issue belongs to project `X` when its project key (the explicit
//!   `project` field, else the issue key up to the last `-`) matches `X`.
//!   [`ProjectMatch::Exact`] compares case-insensitively for equality;
//!   [`ProjectMatch::Prefix`] accepts any project key starting with `X`.
//! - An issue is a blocker when one of its labels is in the configured
//!   blocker labels, or its status is one of the blocker statuses, or
//!   (only if configured) its summary/description contains a blocker
//!   keyword.

use regex::Regex;
use serde::Deserialize;

use crate::models::{IndexedDocument, SourceKind, TrackerFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectMatch {
    #[default]
    Exact,
    Prefix,
}

/// Decides which project an issue belongs to and which projects a
/// question is about.
#[derive(Debug, Clone)]
pub struct ProjectPolicy {
    mode: ProjectMatch,
    projects: Vec<String>,
    mention: Option<Regex>,
}

impl ProjectPolicy {
    pub fn new(mode: ProjectMatch, projects: Vec<String>) -> Self {
        let projects: Vec<String> = projects
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let mention = if projects.is_empty() {
            None
        } else {
            let alternation = projects
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            // Matches a bare key ("ID") or an issue key ("ID-12").
            Regex::new(&format!(r"(?i)\b({})(?:-\d+)?\b", alternation)).ok()
        };

        Self {
            mode,
            projects,
            mention,
        }
    }

    /// A policy with no configured projects; never filters anything.
    pub fn disabled() -> Self {
        Self::new(ProjectMatch::Exact, Vec::new())
    }

    pub fn projects(&self) -> &[String] {
        &self.projects
    }

    /// Whether a project key belongs to the configured project `wanted`.
    pub fn matches(&self, project_key: &str, wanted: &str) -> bool {
        let key = project_key.to_ascii_uppercase();
        let wanted = wanted.to_ascii_uppercase();
        match self.mode {
            ProjectMatch::Exact => key == wanted,
            ProjectMatch::Prefix => key.starts_with(&wanted),
        }
    }

    /// Configured projects named in a question, in configuration order.
    pub fn mentioned_in(&self, question: &str) -> Vec<String> {
        let re = match &self.mention {
            Some(re) => re,
            None => return Vec::new(),
        };
        let found: Vec<String> = re
            .captures_iter(question)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
            .collect();
        self.projects
            .iter()
            .filter(|p| found.contains(&p.to_ascii_uppercase()))
            .cloned()
            .collect()
    }

    /// Whether a retrieved document survives filtering for `wanted`
    /// projects. Non-tracker documents always pass.
    pub fn retains(&self, doc: &IndexedDocument, wanted: &[String]) -> bool {
        if wanted.is_empty() || doc.kind != SourceKind::Tracker {
            return true;
        }
        match doc.meta_str("project") {
            Some(project) => wanted.iter().any(|w| self.matches(project, w)),
            None => false,
        }
    }
}

/// Derive a project key from an issue key (`"WL-104"` → `"WL"`).
pub fn project_from_key(key: &str) -> Option<&str> {
    let (prefix, number) = key.rsplit_once('-')?;
    if prefix.is_empty() || number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(prefix)
}

/// Decides whether a tracker issue counts as a blocker.
#[derive(Debug, Clone, Default)]
pub struct BlockerPolicy {
    labels: Vec<String>,
    statuses: Vec<String>,
    keywords: Vec<String>,
}

impl BlockerPolicy {
    pub fn new(labels: Vec<String>, statuses: Vec<String>, keywords: Vec<String>) -> Self {
        let lower = |v: Vec<String>| v.into_iter().map(|s| s.to_lowercase()).collect();
        Self {
            labels: lower(labels),
            statuses: lower(statuses),
            keywords: lower(keywords),
        }
    }

    pub fn is_blocker(&self, fields: &TrackerFields, summary: &str, body: &str) -> bool {
        if fields
            .labels
            .iter()
            .any(|l| self.labels.contains(&l.to_lowercase()))
        {
            return true;
        }
        if let Some(status) = &fields.status {
            if self.statuses.contains(&status.to_lowercase()) {
                return true;
            }
        }
        if self.keywords.is_empty() {
            return false;
        }
        let haystack = format!("{}\n{}", summary, body).to_lowercase();
        self.keywords.iter().any(|k| haystack.contains(k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn tracker_doc(project: &str) -> IndexedDocument {
        let mut metadata = Metadata::new();
        metadata.insert("project".into(), project.into());
        IndexedDocument {
            kind: SourceKind::Tracker,
            source_id: format!("{}-1", project),
            text: String::new(),
            metadata,
        }
    }

    #[test]
    fn test_project_from_key() {
        assert_eq!(project_from_key("WL-104"), Some("WL"));
        assert_eq!(project_from_key("MY-TEAM-9"), Some("MY-TEAM"));
        assert_eq!(project_from_key("WL"), None);
        assert_eq!(project_from_key("WL-abc"), None);
        assert_eq!(project_from_key("-5"), None);
    }

    #[test]
    fn test_exact_vs_prefix() {
        let exact = ProjectPolicy::new(ProjectMatch::Exact, vec!["MS".into()]);
        assert!(exact.matches("ms", "MS"));
        assert!(!exact.matches("MSG", "MS"));

        let prefix = ProjectPolicy::new(ProjectMatch::Prefix, vec!["MS".into()]);
        assert!(prefix.matches("MSG", "MS"));
        assert!(!prefix.matches("WL", "MS"));
    }

    #[test]
    fn test_mentions_require_word_boundary() {
        let policy = ProjectPolicy::new(
            ProjectMatch::Exact,
            vec!["ID".into(), "WL".into(), "MS".into()],
        );
        assert_eq!(
            policy.mentioned_in("What is blocking WL this sprint?"),
            vec!["WL".to_string()]
        );
        assert_eq!(
            policy.mentioned_in("status of id-12 and ms"),
            vec!["ID".to_string(), "MS".to_string()]
        );
        // "did" contains "id" but is not a mention.
        assert!(policy.mentioned_in("Why did the deploy fail?").is_empty());
    }

    #[test]
    fn test_retains_only_wanted_tracker_docs() {
        let policy = ProjectPolicy::new(ProjectMatch::Exact, vec!["ID".into(), "WL".into()]);
        let wanted = vec!["WL".to_string()];
        assert!(policy.retains(&tracker_doc("WL"), &wanted));
        assert!(!policy.retains(&tracker_doc("ID"), &wanted));

        let wiki = IndexedDocument {
            kind: SourceKind::Wiki,
            source_id: "123".into(),
            text: String::new(),
            metadata: Metadata::new(),
        };
        assert!(policy.retains(&wiki, &wanted));
        assert!(policy.retains(&tracker_doc("ID"), &[]));
    }

    #[test]
    fn test_blocker_policy() {
        let policy = BlockerPolicy::new(
            vec!["Blocker".into()],
            vec!["Blocked".into()],
            Vec::new(),
        );
        let mut fields = TrackerFields {
            status: Some("In Progress".into()),
            labels: vec!["blocker".into()],
            ..Default::default()
        };
        assert!(policy.is_blocker(&fields, "x", ""));

        fields.labels.clear();
        assert!(!policy.is_blocker(&fields, "blocked by infra", ""));

        fields.status = Some("BLOCKED".into());
        assert!(policy.is_blocker(&fields, "x", ""));
    }

    #[test]
    fn test_blocker_keywords_opt_in() {
        let policy = BlockerPolicy::new(Vec::new(), Vec::new(), vec!["blocked by".into()]);
        let fields = TrackerFields::default();
        assert!(policy.is_blocker(&fields, "Rollout", "Currently Blocked by vendor"));
        assert!(!policy.is_blocker(&fields, "Rollout", "on track"));
    }
}
