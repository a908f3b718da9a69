//! GitHub pull request source.
//!
//! Lists pull requests in every state for each configured repository,
//! most recently updated first, capped at `max_pull_requests` per repo.
//! `GITHUB_TOKEN` is optional; without it the unauthenticated rate
//! limit applies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use pulse_core::models::{PullRequestFields, PullRequestState, RecordDetails, SourceRecord};

use crate::config::GithubSourceConfig;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::traits::RecordSource;

const MAX_PER_PAGE: usize = 100;

pub struct GithubSource {
    config: GithubSourceConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
    token: Option<String>,
}

impl GithubSource {
    pub fn new(config: GithubSourceConfig, client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            config,
            client,
            retry,
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    async fn fetch_repo(&self, repo: &str) -> Result<Vec<SourceRecord>> {
        let url = format!(
            "{}/repos/{}/pulls",
            self.config.api_base.trim_end_matches('/'),
            repo
        );
        let cap = self.config.max_pull_requests;
        let per_page = cap.clamp(1, MAX_PER_PAGE);

        let mut records = Vec::new();
        let mut page = 1usize;
        while records.len() < cap {
            let query = [
                ("state", "all".to_string()),
                ("sort", "updated".to_string()),
                ("direction", "desc".to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ];
            let what = format!("GitHub pulls {}", repo);
            let response = send_with_retry(&self.retry, &what, || {
                let request = self
                    .client
                    .get(&url)
                    .query(&query)
                    .header("Accept", "application/vnd.github+json")
                    .header("User-Agent", "pulse");
                match &self.token {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;

            let json: Value = response.json().await?;
            let pulls = json
                .as_array()
                .ok_or_else(|| anyhow!("Invalid GitHub response: expected an array"))?;
            for pull in pulls.iter().take(cap - records.len()) {
                records.push(parse_pull(pull, repo));
            }
            if pulls.len() < per_page {
                break;
            }
            page += 1;
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSource for GithubSource {
    fn name(&self) -> &str {
        "github"
    }

    fn source_type(&self) -> &str {
        "github"
    }

    fn description(&self) -> String {
        format!(
            "{} (repos: {}, max {} each)",
            self.config.api_base,
            self.config.repos.join(", "),
            self.config.max_pull_requests
        )
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>> {
        let mut records = Vec::new();
        for repo in &self.config.repos {
            let pulls = self.fetch_repo(repo).await?;
            tracing::info!(repo = %repo, pulls = pulls.len(), "fetched GitHub pull requests");
            records.extend(pulls);
        }
        Ok(records)
    }
}

/// Convert one entry of `GET /repos/{repo}/pulls` into a record whose id
/// is `owner/name#number`.
pub fn parse_pull(pull: &Value, repo: &str) -> SourceRecord {
    let state = if pull.get("merged_at").map(|v| !v.is_null()).unwrap_or(false) {
        PullRequestState::Merged
    } else if pull.get("state").and_then(Value::as_str) == Some("closed") {
        PullRequestState::Closed
    } else {
        PullRequestState::Open
    };

    SourceRecord {
        id: pull
            .get("number")
            .and_then(Value::as_u64)
            .map(|n| format!("{}#{}", repo, n)),
        title: pull.get("title").and_then(Value::as_str).map(str::to_string),
        body: pull.get("body").and_then(Value::as_str).map(str::to_string),
        url: pull
            .get("html_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        last_updated: pull
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        details: RecordDetails::CodeHost(PullRequestFields {
            state,
            author: pull
                .pointer("/user/login")
                .and_then(Value::as_str)
                .map(str::to_string),
            repository: Some(repo.to_string()),
        }),
    }
}
