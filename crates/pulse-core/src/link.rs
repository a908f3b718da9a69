//! Parent/child resolution for tracker issues.
//!
//! Raw tracker records only carry a one-directional `parent_ref`. The
//! retrieval index has no graph queries, so the hierarchy is resolved
//! over the whole ingestion batch and then rendered into each issue's
//! document text.
//!
//! # Algorithm
//!
//! 1. **Pass 1**: load every identifiable tracker record into a keyed
//!    map, each with an empty children list.
//! 2. **Pass 2**: for every record whose `parent_ref` resolves inside
//!    the map, record the parent link and append `(id, summary, status)`
//!    to the parent's children list.
//!
//! Pass 2 only starts once pass 1 has seen the entire batch, so a parent
//! appearing later in iteration order is still found. A `parent_ref`
//! that does not resolve is simply left unlinked.
//!
//! The graph borrows nothing from the records and holds ids, not
//! references, so it can be dropped as soon as documents are emitted.

use std::collections::HashMap;

use crate::models::SourceRecord;

/// Short description of a linked issue, as rendered into document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub id: String,
    pub summary: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
struct Node {
    summary: String,
    status: String,
    parent: Option<String>,
    children: Vec<IssueRef>,
}

/// Resolved parent/child relationships for one ingestion batch.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    nodes: HashMap<String, Node>,
}

impl RelationshipGraph {
    /// Build the graph from a batch of records. Non-tracker records and
    /// records the normalizer would reject (no id or no title) are
    /// ignored, so no link ever names a document missing from the index.
    pub fn build(records: &[SourceRecord]) -> Self {
        let mut nodes: HashMap<String, Node> = HashMap::new();
        let mut order: Vec<(String, Option<String>)> = Vec::new();

        // Pass 1
        for record in records {
            let (id, fields, summary) = match (record.key(), record.tracker(), record.summary()) {
                (Some(id), Some(fields), Some(summary)) => (id, fields, summary),
                _ => continue,
            };
            if nodes.contains_key(id) {
                tracing::warn!(id, "duplicate tracker id in batch; keeping the first");
                continue;
            }
            nodes.insert(
                id.to_string(),
                Node {
                    summary: summary.to_string(),
                    status: fields
                        .status
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                    parent: None,
                    children: Vec::new(),
                },
            );
            let parent_ref = fields
                .parent_ref
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string);
            order.push((id.to_string(), parent_ref));
        }

        // Pass 2
        for (id, parent_ref) in order {
            let parent_id = match parent_ref {
                Some(p) if p != id && nodes.contains_key(&p) => p,
                _ => continue,
            };
            let child = {
                let node = &nodes[&id];
                IssueRef {
                    id: id.clone(),
                    summary: node.summary.clone(),
                    status: node.status.clone(),
                }
            };
            if let Some(parent) = nodes.get_mut(&parent_id) {
                parent.children.push(child);
            }
            if let Some(node) = nodes.get_mut(&id) {
                node.parent = Some(parent_id);
            }
        }

        Self { nodes }
    }

    /// The resolved parent of `id`, if it was present in the batch.
    pub fn parent_of(&self, id: &str) -> Option<IssueRef> {
        let parent_id = self.nodes.get(id)?.parent.as_ref()?;
        let parent = self.nodes.get(parent_id)?;
        Some(IssueRef {
            id: parent_id.clone(),
            summary: parent.summary.clone(),
            status: parent.status.clone(),
        })
    }

    /// Direct children of `id`, in batch order.
    pub fn children_of(&self, id: &str) -> &[IssueRef] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
