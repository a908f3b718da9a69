//! Extension trait for record sources.
//!
//! Every upstream system (tracker, code host, wiki, local JSON dump)
//! implements [`RecordSource`]. The ingestion cycle fetches from each
//! registered source independently, so one failing source never blocks
//! the others.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                SourceRegistry                │
//! │  ┌──────┐ ┌────────┐ ┌────────────┐ ┌──────┐ │
//! │  │ Jira │ │ GitHub │ │ Confluence │ │ JSON │ │
//! │  └──────┘ └────────┘ └────────────┘ └──────┘ │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!          run_ingestion_cycle() → link → normalize → reindex
//! ```

use anyhow::Result;
use async_trait::async_trait;

use pulse_core::models::SourceRecord;

/// An upstream system that produces raw records for ingestion.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use pulse::traits::RecordSource;
/// use pulse_core::models::SourceRecord;
///
/// pub struct FixedSource;
///
/// #[async_trait]
/// impl RecordSource for FixedSource {
///     fn name(&self) -> &str { "fixed" }
///     fn description(&self) -> String { "Two hard-coded issues".to_string() }
///
///     async fn fetch(&self) -> Result<Vec<SourceRecord>> {
///         Ok(vec![
///             SourceRecord::tracker_issue("ID-1", "Login bug", "In Progress", None),
///             SourceRecord::tracker_issue("ID-2", "Fix token refresh", "To Do", Some("ID-1")),
///         ])
///     }
/// }
/// ```
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Instance name, used in logs and failure reports.
    fn name(&self) -> &str;

    /// Source type identifier (`"jira"`, `"github"`, `"confluence"`, `"json"`).
    fn source_type(&self) -> &str {
        "custom"
    }

    /// One-line description for `pulse sources`.
    fn description(&self) -> String;

    /// Fetch every record this source currently exposes.
    ///
    /// Transient upstream failures are retried inside the source; an
    /// `Err` here means the source is unavailable for this cycle.
    async fn fetch(&self) -> Result<Vec<SourceRecord>>;
}

/// Ordered collection of configured sources.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Box<dyn RecordSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Box<dyn RecordSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Box<dyn RecordSource>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
