//! Source construction and the `pulse sources` listing.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::time::Duration;

use crate::config::Config;
use crate::connector_confluence::ConfluenceSource;
use crate::connector_github::GithubSource;
use crate::connector_jira::JiraSource;
use crate::connector_json::JsonFileSource;
use crate::retry::RetryPolicy;
use crate::sqlite_store::IngestRun;
use crate::traits::SourceRegistry;

/// Build every source configured under `[sources.*]`, sharing one HTTP
/// client and retry policy.
pub fn build_sources(config: &Config, retry: &RetryPolicy) -> Result<SourceRegistry> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.ingest.http_timeout_secs))
        .build()?;

    let mut registry = SourceRegistry::new();
    if let Some(jira) = &config.sources.jira {
        registry.register(Box::new(JiraSource::new(
            jira.clone(),
            client.clone(),
            retry.clone(),
        )));
    }
    if let Some(github) = &config.sources.github {
        registry.register(Box::new(GithubSource::new(
            github.clone(),
            client.clone(),
            retry.clone(),
        )));
    }
    if let Some(confluence) = &config.sources.confluence {
        registry.register(Box::new(ConfluenceSource::new(
            confluence.clone(),
            client.clone(),
            retry.clone(),
        )));
    }
    if let Some(json) = &config.sources.json {
        registry.register(Box::new(JsonFileSource::new(json.path.clone())));
    }
    Ok(registry)
}

pub fn list_sources(registry: &SourceRegistry, last_run: Option<&IngestRun>) {
    println!("{:<12} {:<12} DESCRIPTION", "SOURCE", "TYPE");
    if registry.is_empty() {
        println!("(no sources configured)");
    }
    for source in registry.sources() {
        println!(
            "{:<12} {:<12} {}",
            source.name(),
            source.source_type(),
            source.description()
        );
    }

    println!();
    match last_run {
        Some(run) => {
            let finished = Utc
                .timestamp_opt(run.finished_at, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| run.finished_at.to_string());
            println!("last ingest: {}", finished);
            println!(
                "  fetched: {}  indexed: {}  skipped: {}  malformed: {}",
                run.fetched, run.indexed, run.skipped, run.malformed
            );
            if !run.failed_sources.is_empty() {
                println!("  failed sources: {}", run.failed_sources.join(", "));
            }
        }
        None => println!("last ingest: never"),
    }
}
