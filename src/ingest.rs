//! Ingestion cycle orchestration.
//!
//! One cycle: fetch from every source concurrently → link → normalize →
//! full reindex. A failing source is skipped for the cycle; when every
//! source fails the previous index is left untouched rather than
//! replaced with an empty one.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use pulse_core::error::PipelineError;
use pulse_core::normalize::Normalizer;
use pulse_core::pipeline::build_documents;
use pulse_core::store::IndexStore;

use crate::app::AppContext;
use crate::sqlite_store::IngestRun;
use crate::traits::SourceRegistry;

/// What one ingestion cycle did.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub fetched: usize,
    pub failed_sources: Vec<String>,
    pub malformed: usize,
    pub indexed: usize,
    pub skipped: usize,
    /// False when the cycle left the previous index in place.
    pub reindexed: bool,
}

pub async fn run_ingestion_cycle(
    sources: &SourceRegistry,
    normalizer: &Normalizer,
    store: &dyn IndexStore,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    if sources.is_empty() {
        tracing::warn!("no sources configured; nothing to ingest");
        return Ok(report);
    }

    let fetches = sources.sources().iter().map(|source| async move {
        let result = source.fetch().await;
        (source.name(), result)
    });

    let mut records = Vec::new();
    for (name, result) in join_all(fetches).await {
        match result {
            Ok(batch) => {
                tracing::info!(source = name, records = batch.len(), "source fetched");
                records.extend(batch);
            }
            Err(e) => {
                let err = PipelineError::source_fetch(name, &e);
                tracing::warn!(source = name, error = %err, "source skipped for this cycle");
                report.failed_sources.push(name.to_string());
            }
        }
    }

    if report.failed_sources.len() == sources.len() {
        tracing::error!("every source failed; keeping the previous index");
        return Ok(report);
    }

    report.fetched = records.len();
    let batch = build_documents(&records, normalizer);
    report.malformed = batch.malformed.len();

    let result = store
        .reindex_all(batch.documents)
        .await
        .context("Failed to rebuild the index")?;
    report.indexed = result.indexed;
    report.skipped = result.skipped.len();
    report.reindexed = true;

    tracing::info!(
        fetched = report.fetched,
        indexed = report.indexed,
        skipped = report.skipped,
        malformed = report.malformed,
        failed_sources = report.failed_sources.len(),
        "ingestion cycle complete"
    );
    Ok(report)
}

/// Run one cycle against the application's store and, when the index is
/// SQLite-backed, record it in `ingest_runs`.
pub async fn ingest(ctx: &AppContext) -> Result<IngestReport> {
    let started_at = Utc::now().timestamp();
    let report = run_ingestion_cycle(&ctx.sources, &ctx.normalizer, ctx.store.as_ref()).await?;

    if let Some(run_log) = &ctx.run_log {
        let run = IngestRun {
            started_at,
            finished_at: Utc::now().timestamp(),
            fetched: report.fetched as i64,
            indexed: report.indexed as i64,
            skipped: report.skipped as i64,
            malformed: report.malformed as i64,
            failed_sources: report.failed_sources.clone(),
        };
        if let Err(e) = run_log.record_ingest_run(&run).await {
            tracing::warn!(error = %format!("{:#}", e), "failed to record ingest run");
        }
    }
    Ok(report)
}

/// `pulse sync`: one cycle with a printed summary.
pub async fn run_sync(ctx: &AppContext) -> Result<()> {
    let report = ingest(ctx).await?;

    println!("sync");
    println!("  sources: {}", ctx.sources.len());
    println!("  fetched: {} records", report.fetched);
    println!("  malformed: {}", report.malformed);
    println!("  indexed documents: {}", report.indexed);
    println!("  skipped documents: {}", report.skipped);
    if !report.failed_sources.is_empty() {
        println!("  failed sources: {}", report.failed_sources.join(", "));
    }
    if report.reindexed {
        println!("ok");
    } else {
        println!("index unchanged");
    }
    Ok(())
}

/// Spawn the periodic refresher when `[ingest] refresh_interval_secs` is
/// non-zero. Cycles run sequentially inside the one task.
pub fn spawn_refresher(ctx: Arc<AppContext>) -> Option<JoinHandle<()>> {
    let secs = ctx.config.ingest.refresh_interval_secs;
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tracing::info!("scheduled ingestion starting");
            if let Err(e) = ingest(&ctx).await {
                tracing::error!(error = %format!("{:#}", e), "scheduled ingestion failed");
            }
        }
    }))
}
