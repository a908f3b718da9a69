//! Context assembly and answer generation.
//!
//! [`AnswerEngine::answer`] never fails: empty retrieval yields
//! [`NO_RESULTS_MESSAGE`], and retrieval or generation failures come back
//! as strings prefixed with [`ERROR_PREFIX`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::generate::{collect_text, Generator};
use crate::models::IndexedDocument;
use crate::policy::ProjectPolicy;
use crate::prompt::build_grounding_prompt;
use crate::store::IndexStore;

pub const NO_RESULTS_MESSAGE: &str =
    "No relevant tickets, pull requests or pages found for your question.";
pub const ERROR_PREFIX: &str = "[ERROR] ";

/// Anything that can turn a question into a reply string.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, question: &str) -> String;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub citation_base_url: String,
}

fn default_top_k() -> usize {
    8
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            citation_base_url: String::new(),
        }
    }
}

pub struct AnswerEngine {
    store: Arc<dyn IndexStore>,
    generator: Arc<dyn Generator>,
    settings: AnswerSettings,
    projects: ProjectPolicy,
}

impl AnswerEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        generator: Arc<dyn Generator>,
        settings: AnswerSettings,
        projects: ProjectPolicy,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
            projects,
        }
    }

    /// Retrieve and post-filter the documents that ground `question`.
    /// `Ok(empty)` means nothing relevant.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<IndexedDocument>, PipelineError> {
        let k = self.settings.top_k.max(1);
        let mut docs = self
            .store
            .query(question, k)
            .await
            .map_err(|e| PipelineError::Retrieval(format!("{:#}", e)))?;

        let wanted = self.projects.mentioned_in(question);
        if !wanted.is_empty() {
            let before = docs.len();
            docs.retain(|d| self.projects.retains(d, &wanted));
            tracing::debug!(?wanted, before, after = docs.len(), "project filter applied");
        }
        Ok(docs)
    }

    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let stream = self
            .generator
            .stream(prompt)
            .await
            .map_err(|e| PipelineError::Generation(format!("{:#}", e)))?;
        let text = collect_text(stream)
            .await
            .map_err(|e| PipelineError::Generation(format!("{:#}", e)))?;
        if text.trim().is_empty() {
            return Err(PipelineError::Generation(
                "model returned an empty response".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Join ranked document texts into one context block, closest first.
///
/// Documents are separated by a blank line (`"\n\n"`), not a single
/// newline; each document text is itself multi-line.
pub fn assemble_context(docs: &[IndexedDocument]) -> String {
    docs.iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Answerer for AnswerEngine {
    async fn answer(&self, question: &str) -> String {
        let docs = match self.retrieve(question).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::error!(error = %e, "retrieval failed");
                return format!("{}{}", ERROR_PREFIX, e);
            }
        };
        if docs.is_empty() {
            return NO_RESULTS_MESSAGE.to_string();
        }

        let context = assemble_context(&docs);
        let prompt = build_grounding_prompt(question, &context, &self.settings.citation_base_url);
        tracing::debug!(
            documents = docs.len(),
            prompt_chars = prompt.len(),
            model = self.generator.model_name(),
            "generating answer"
        );

        match self.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "generation failed");
                format!("{}{}", ERROR_PREFIX, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::TextStream;
    use crate::models::{Metadata, SourceKind};
    use crate::policy::ProjectMatch;
    use crate::store::ReindexReport;
    use anyhow::{bail, Result};
    use futures::{stream, StreamExt};
    use std::sync::Mutex;

    /// Returns a fixed document list and records the requested k.
    struct FixedStore {
        docs: Vec<IndexedDocument>,
        fail: bool,
        last_k: Mutex<Option<usize>>,
    }

    impl FixedStore {
        fn new(docs: Vec<IndexedDocument>) -> Self {
            Self {
                docs,
                fail: false,
                last_k: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl IndexStore for FixedStore {
        async fn reindex_all(&self, _documents: Vec<IndexedDocument>) -> Result<ReindexReport> {
            Ok(ReindexReport::default())
        }
        async fn query(&self, _text: &str, k: usize) -> Result<Vec<IndexedDocument>> {
            *self.last_k.lock().unwrap() = Some(k);
            if self.fail {
                bail!("index unavailable");
            }
            Ok(self.docs.iter().take(k).cloned().collect())
        }
        async fn get(&self, _kind: SourceKind, _id: &str) -> Result<Option<IndexedDocument>> {
            Ok(None)
        }
        async fn count(&self) -> Result<usize> {
            Ok(self.docs.len())
        }
    }

    /// Records the prompt and replays fixed chunks.
    struct EchoGenerator {
        prompt: Mutex<Option<String>>,
        chunks: Option<Vec<&'static str>>,
    }

    impl EchoGenerator {
        fn with_chunks(chunks: Vec<&'static str>) -> Self {
            Self {
                prompt: Mutex::new(None),
                chunks: Some(chunks),
            }
        }
        fn failing() -> Self {
            Self {
                prompt: Mutex::new(None),
                chunks: None,
            }
        }
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn stream(&self, prompt: &str) -> Result<TextStream> {
            *self.prompt.lock().unwrap() = Some(prompt.to_string());
            match &self.chunks {
                Some(chunks) => {
                    let items: Vec<Result<String>> =
                        chunks.iter().map(|c| Ok(c.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                None => bail!("quota exceeded"),
            }
        }
    }

    fn tracker(id: &str, project: &str) -> IndexedDocument {
        let mut metadata = Metadata::new();
        metadata.insert("key".into(), id.into());
        metadata.insert("project".into(), project.into());
        IndexedDocument {
            kind: SourceKind::Tracker,
            source_id: id.to_string(),
            text: format!("Issue: {}", id),
            metadata,
        }
    }

    fn engine(store: FixedStore, generator: Arc<EchoGenerator>) -> AnswerEngine {
        AnswerEngine::new(
            Arc::new(store),
            generator,
            AnswerSettings {
                top_k: 8,
                citation_base_url: "https://acme.atlassian.net".into(),
            },
            ProjectPolicy::new(ProjectMatch::Exact, vec!["ID".into(), "WL".into()]),
        )
    }

    #[test]
    fn test_context_separates_documents_with_blank_line() {
        let mut first = tracker("ID-1", "ID");
        first.text = "Issue: ID-1\nStatus: Open".into();
        let second = tracker("WL-2", "WL");
        assert_eq!(
            assemble_context(&[first, second]),
            "Issue: ID-1\nStatus: Open\n\nIssue: WL-2"
        );
        assert_eq!(assemble_context(&[]), "");
    }

    #[tokio::test]
    async fn test_empty_retrieval_returns_fixed_message() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["unused"]));
        let engine = engine(FixedStore::new(Vec::new()), generator.clone());
        assert_eq!(engine.answer("anything?").await, NO_RESULTS_MESSAGE);
        assert!(generator.prompt.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_answer_concatenates_stream_and_grounds_prompt() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["*Summary*", ": all good"]));
        let store = FixedStore::new(vec![tracker("ID-1", "ID"), tracker("WL-2", "WL")]);
        let engine = engine(store, generator.clone());

        let reply = engine.answer("how are things?").await;
        assert_eq!(reply, "*Summary*: all good");

        let prompt = generator.prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Issue: ID-1\n\nIssue: WL-2"));
        assert!(prompt.contains("https://acme.atlassian.net/browse/"));
    }

    #[tokio::test]
    async fn test_requests_configured_top_k() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["ok"]));
        let store = Arc::new(FixedStore::new(vec![tracker("ID-1", "ID")]));
        let engine = AnswerEngine::new(
            store.clone(),
            generator,
            AnswerSettings {
                top_k: 3,
                citation_base_url: String::new(),
            },
            ProjectPolicy::disabled(),
        );
        engine.answer("status?").await;
        assert_eq!(*store.last_k.lock().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_project_mention_filters_tracker_docs() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["ok"]));
        let mut wiki = tracker("9001", "WL");
        wiki.kind = SourceKind::Wiki;
        wiki.text = "Wiki Page: Roadmap".into();
        let store = FixedStore::new(vec![tracker("ID-1", "ID"), tracker("WL-2", "WL"), wiki]);
        let engine = engine(store, generator.clone());

        engine.answer("What is blocking WL?").await;
        let prompt = generator.prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Issue: WL-2"));
        assert!(prompt.contains("Wiki Page: Roadmap"));
        assert!(!prompt.contains("Issue: ID-1"));
    }

    #[tokio::test]
    async fn test_filtered_to_nothing_returns_fixed_message() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["ok"]));
        let engine = engine(FixedStore::new(vec![tracker("ID-1", "ID")]), generator);
        assert_eq!(engine.answer("any news on WL?").await, NO_RESULTS_MESSAGE);
    }

    #[tokio::test]
    async fn test_generation_failure_becomes_error_string() {
        let generator = Arc::new(EchoGenerator::failing());
        let engine = engine(FixedStore::new(vec![tracker("ID-1", "ID")]), generator);
        let reply = engine.answer("status?").await;
        assert!(reply.starts_with(ERROR_PREFIX));
        assert!(reply.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_empty_generation_is_an_error() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["", "  "]));
        let engine = engine(FixedStore::new(vec![tracker("ID-1", "ID")]), generator);
        let reply = engine.answer("status?").await;
        assert!(reply.starts_with(ERROR_PREFIX));
    }

    #[tokio::test]
    async fn test_retrieval_failure_becomes_error_string() {
        let generator = Arc::new(EchoGenerator::with_chunks(vec!["ok"]));
        let mut store = FixedStore::new(Vec::new());
        store.fail = true;
        let engine = engine(store, generator);
        let reply = engine.answer("status?").await;
        assert!(reply.starts_with("[ERROR] retrieval failed"));
        assert!(reply.contains("index unavailable"));
    }
}
