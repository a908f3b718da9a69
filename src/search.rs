//! `pulse search` and `pulse ask`.

use anyhow::{bail, Result};

use pulse_core::answer::Answerer;
use pulse_core::models::IndexedDocument;
use pulse_core::store::IndexStore;

use crate::app::AppContext;

pub async fn run_search(ctx: &AppContext, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let k = limit.unwrap_or(ctx.config.retrieval.top_k).max(1);
    let docs = ctx.store.query(query, k).await?;

    if docs.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, doc) in docs.iter().enumerate() {
        println!("{}", format_hit(i + 1, doc));
    }
    Ok(())
}

/// One result line plus its citation, e.g.
/// `1. [tracker] ID-1  Login bug  (In Progress)`.
fn format_hit(rank: usize, doc: &IndexedDocument) -> String {
    let key = doc.meta_str("key").unwrap_or(&doc.source_id);
    let title = doc.meta_str("title").unwrap_or("");
    let mut line = format!("{}. [{}] {}  {}", rank, doc.kind, key, title);
    if let Some(status) = doc.meta_str("status") {
        line.push_str(&format!("  ({})", status));
    }
    if doc.meta_flag("is_blocker") {
        line.push_str("  BLOCKER");
    }
    if let Some(url) = doc.meta_str("url") {
        line.push_str(&format!("\n    {}", url));
    }
    line
}

pub async fn run_ask(ctx: &AppContext, question: &str) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let answer = ctx.answerer.answer(question).await;
    println!("{}", answer);
    Ok(())
}
