//! Application wiring.
//!
//! [`AppContext`] is built once at startup from the configuration and
//! shared by `Arc` between the CLI commands, the ingestion refresher and
//! the HTTP server. Nothing in the crate reaches for globals.

use anyhow::Result;
use std::sync::Arc;

use pulse_core::answer::{AnswerEngine, AnswerSettings, Answerer};
use pulse_core::normalize::Normalizer;
use pulse_core::policy::{BlockerPolicy, ProjectPolicy};
use pulse_core::store::memory::InMemoryIndex;
use pulse_core::store::IndexStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::migrate::run_migrations;
use crate::retry::RetryPolicy;
use crate::sources::build_sources;
use crate::sqlite_store::SqliteIndex;
use crate::traits::SourceRegistry;

pub struct AppContext {
    pub config: Arc<Config>,
    pub retry: RetryPolicy,
    pub store: Arc<dyn IndexStore>,
    /// Set when the index lives in SQLite; ingest runs are recorded there.
    pub run_log: Option<Arc<SqliteIndex>>,
    pub normalizer: Normalizer,
    pub sources: SourceRegistry,
    pub answerer: Arc<dyn Answerer>,
}

impl AppContext {
    pub async fn build(config: Config) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let embedder = create_embedder(&config.embedding, retry.clone())?;
        let generator = create_generator(&config.generation, retry.clone())?;

        let (store, run_log): (Arc<dyn IndexStore>, Option<Arc<SqliteIndex>>) =
            match config.index.backend.as_str() {
                "memory" => (
                    Arc::new(InMemoryIndex::new(
                        embedder,
                        config.embedding.batch_size,
                        config.index.min_similarity,
                    )),
                    None,
                ),
                _ => {
                    let pool = db::connect(&config).await?;
                    run_migrations(&pool).await?;
                    let sqlite = Arc::new(SqliteIndex::new(
                        pool,
                        embedder,
                        config.embedding.batch_size,
                        config.index.min_similarity,
                    ));
                    (sqlite.clone(), Some(sqlite))
                }
            };

        let normalizer = Normalizer::new(
            config.truncation,
            BlockerPolicy::new(
                config.policy.blocker_labels.clone(),
                config.policy.blocker_statuses.clone(),
                config.policy.blocker_keywords.clone(),
            ),
        );

        let answerer: Arc<dyn Answerer> = Arc::new(AnswerEngine::new(
            store.clone(),
            generator,
            AnswerSettings {
                top_k: config.retrieval.top_k,
                citation_base_url: config.citation_base_url(),
            },
            ProjectPolicy::new(config.policy.project_match, config.policy.projects.clone()),
        ));

        let sources = build_sources(&config, &retry)?;

        tracing::info!(
            backend = %config.index.backend,
            embedding = %config.embedding.provider,
            generation = %config.generation.provider,
            sources = sources.len(),
            "application context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            retry,
            store,
            run_log,
            normalizer,
            sources,
            answerer,
        })
    }
}
