//! Jira issue tracker source.
//!
//! Pulls issues per configured project through the REST v2 search
//! endpoint, newest first, paging with `startAt`/`maxResults`.
//!
//! # Configuration
//!
//! ```toml
//! [sources.jira]
//! base_url = "https://acme.atlassian.net"
//! projects = ["ID", "WL", "MS"]
//! page_size = 100
//! # max_issues = 500
//! # epic_link_field = "customfield_10014"
//! ```
//!
//! Credentials come from `JIRA_EMAIL` and `JIRA_API_TOKEN` and are sent
//! as HTTP basic auth.
//!
//! # Parent Links
//!
//! Sub-tasks and next-gen children carry `fields.parent.key`. Classic
//! projects link stories to epics through a custom "Epic Link" field
//! whose id differs per site; it is taken from `epic_link_field` or
//! discovered once through `GET /rest/api/2/field`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::OnceCell;

use pulse_core::models::{RecordDetails, SourceRecord, TrackerFields};

use crate::config::JiraSourceConfig;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::traits::RecordSource;

const BASE_FIELDS: &str = "summary,status,assignee,description,updated,parent,labels,issuetype,project";

pub struct JiraSource {
    config: JiraSourceConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
    credentials: Option<(String, String)>,
    epic_field: OnceCell<Option<String>>,
}

impl JiraSource {
    pub fn new(config: JiraSourceConfig, client: reqwest::Client, retry: RetryPolicy) -> Self {
        let credentials = match (std::env::var("JIRA_EMAIL"), std::env::var("JIRA_API_TOKEN")) {
            (Ok(email), Ok(token)) => Some((email, token)),
            _ => None,
        };
        Self {
            config,
            client,
            retry,
            credentials,
            epic_field: OnceCell::new(),
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).header("Accept", "application/json");
        match &self.credentials {
            Some((email, token)) => request.basic_auth(email, Some(token)),
            None => request,
        }
    }

    /// The epic link field id, resolved once per source instance.
    async fn epic_field(&self) -> Option<String> {
        self.epic_field
            .get_or_init(|| async {
                if let Some(id) = &self.config.epic_link_field {
                    return Some(id.clone());
                }
                match self.discover_epic_field().await {
                    Ok(Some(id)) => {
                        tracing::info!(field = %id, "discovered Jira epic link field");
                        Some(id)
                    }
                    Ok(None) => {
                        tracing::warn!("no Jira epic link field found; epic relationships unavailable");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %format!("{:#}", e), "Jira field discovery failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn discover_epic_field(&self) -> Result<Option<String>> {
        let url = format!("{}/rest/api/2/field", self.base_url());
        let response = send_with_retry(&self.retry, "Jira field list", || self.get(&url)).await?;
        let fields: Value = response.json().await?;
        Ok(find_epic_link_field(&fields))
    }

    async fn fetch_project(
        &self,
        project: &str,
        epic_field: Option<&str>,
    ) -> Result<Vec<SourceRecord>> {
        let url = format!("{}/rest/api/2/search", self.base_url());
        let jql = format!("project = \"{}\" ORDER BY updated DESC", project);
        let fields = match epic_field {
            Some(f) => format!("{},{}", BASE_FIELDS, f),
            None => BASE_FIELDS.to_string(),
        };
        let cap = self.config.max_issues.unwrap_or(usize::MAX);
        let page_size = self.config.page_size.max(1);

        let mut records = Vec::new();
        let mut start_at = 0usize;
        loop {
            let max_results = page_size.min(cap - records.len());
            let query = [
                ("jql", jql.clone()),
                ("startAt", start_at.to_string()),
                ("maxResults", max_results.to_string()),
                ("fields", fields.clone()),
            ];
            let what = format!("Jira search {}", project);
            let response =
                send_with_retry(&self.retry, &what, || self.get(&url).query(&query)).await?;
            let page: Value = response.json().await?;

            let issues = page
                .get("issues")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("Invalid Jira search response: missing issues"))?;
            if issues.is_empty() {
                break;
            }
            for issue in issues {
                records.push(parse_issue(issue, self.base_url(), epic_field));
                if records.len() >= cap {
                    return Ok(records);
                }
            }

            start_at += issues.len();
            let total = page.get("total").and_then(Value::as_u64).unwrap_or(0) as usize;
            if start_at >= total {
                break;
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSource for JiraSource {
    fn name(&self) -> &str {
        "jira"
    }

    fn source_type(&self) -> &str {
        "jira"
    }

    fn description(&self) -> String {
        format!(
            "{} (projects: {})",
            self.base_url(),
            self.config.projects.join(", ")
        )
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>> {
        if self.credentials.is_none() {
            return Err(anyhow!("JIRA_EMAIL and JIRA_API_TOKEN must be set"));
        }
        let epic_field = self.epic_field().await;

        let mut records = Vec::new();
        for project in &self.config.projects {
            let issues = self.fetch_project(project, epic_field.as_deref()).await?;
            tracing::info!(project = %project, issues = issues.len(), "fetched Jira issues");
            records.extend(issues);
        }
        Ok(records)
    }
}

/// Find the id of the field named "Epic Link" in a `/field` listing.
pub fn find_epic_link_field(fields: &Value) -> Option<String> {
    fields.as_array()?.iter().find_map(|f| {
        let name = f.get("name")?.as_str()?;
        if name.eq_ignore_ascii_case("epic link") {
            f.get("id")?.as_str().map(str::to_string)
        } else {
            None
        }
    })
}

/// Convert one issue from a search response into a tracker record.
pub fn parse_issue(issue: &Value, base_url: &str, epic_field: Option<&str>) -> SourceRecord {
    let fields = &issue["fields"];
    let key = issue.get("key").and_then(Value::as_str).map(str::to_string);

    let parent_ref = fields
        .pointer("/parent/key")
        .and_then(Value::as_str)
        .or_else(|| epic_field.and_then(|f| fields.get(f)).and_then(Value::as_str))
        .map(str::to_string);

    let labels = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|ls| {
            ls.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let url = key
        .as_ref()
        .map(|k| format!("{}/browse/{}", base_url.trim_end_matches('/'), k));

    SourceRecord {
        id: key,
        title: str_field(fields, "/summary"),
        body: str_field(fields, "/description"),
        url,
        last_updated: fields
            .get("updated")
            .and_then(Value::as_str)
            .and_then(parse_jira_time),
        details: RecordDetails::Tracker(TrackerFields {
            status: str_field(fields, "/status/name"),
            assignee: str_field(fields, "/assignee/displayName"),
            parent_ref,
            labels,
            issue_type: str_field(fields, "/issuetype/name"),
            project: str_field(fields, "/project/key"),
        }),
    }
}

fn str_field(fields: &Value, pointer: &str) -> Option<String> {
    fields
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Jira timestamps look like `2024-05-01T10:00:00.000+0000`.
fn parse_jira_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
