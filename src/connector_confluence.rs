//! Confluence wiki source.
//!
//! Searches pages per space with CQL, expanding the storage-format body
//! so the normalizer can strip the markup. Credentials come from
//! `CONFLUENCE_EMAIL` and `CONFLUENCE_API_TOKEN`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use pulse_core::models::{RecordDetails, SourceRecord, WikiFields};

use crate::config::ConfluenceSourceConfig;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::traits::RecordSource;

pub struct ConfluenceSource {
    config: ConfluenceSourceConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
    credentials: Option<(String, String)>,
}

impl ConfluenceSource {
    pub fn new(config: ConfluenceSourceConfig, client: reqwest::Client, retry: RetryPolicy) -> Self {
        let credentials = match (
            std::env::var("CONFLUENCE_EMAIL"),
            std::env::var("CONFLUENCE_API_TOKEN"),
        ) {
            (Ok(email), Ok(token)) => Some((email, token)),
            _ => None,
        };
        Self {
            config,
            client,
            retry,
            credentials,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn fetch_space(&self, space: &str) -> Result<Vec<SourceRecord>> {
        let (email, token) = self
            .credentials
            .as_ref()
            .ok_or_else(|| anyhow!("CONFLUENCE_EMAIL and CONFLUENCE_API_TOKEN must be set"))?;
        let url = format!("{}/rest/api/content/search", self.base_url());
        let cql = format!("space = \"{}\" and type = page order by lastmodified desc", space);
        let cap = self.config.max_pages.unwrap_or(usize::MAX);
        let page_size = self.config.page_size.max(1);

        let mut records = Vec::new();
        let mut start = 0usize;
        loop {
            let query = [
                ("cql", cql.clone()),
                ("start", start.to_string()),
                ("limit", page_size.min(cap - records.len()).to_string()),
                ("expand", "body.storage,version,space".to_string()),
            ];
            let what = format!("Confluence search {}", space);
            let response = send_with_retry(&self.retry, &what, || {
                self.client
                    .get(&url)
                    .query(&query)
                    .basic_auth(email, Some(token))
                    .header("Accept", "application/json")
            })
            .await?;
            let json: Value = response.json().await?;

            let results = json
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("Invalid Confluence response: missing results"))?;
            for page in results {
                records.push(parse_page(page, self.base_url()));
                if records.len() >= cap {
                    return Ok(records);
                }
            }
            if results.len() < page_size || json.pointer("/_links/next").is_none() {
                break;
            }
            start += results.len();
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSource for ConfluenceSource {
    fn name(&self) -> &str {
        "confluence"
    }

    fn source_type(&self) -> &str {
        "confluence"
    }

    fn description(&self) -> String {
        format!("{} (spaces: {})", self.base_url(), self.config.spaces.join(", "))
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>> {
        let mut records = Vec::new();
        for space in &self.config.spaces {
            let pages = self.fetch_space(space).await?;
            tracing::info!(space = %space, pages = pages.len(), "fetched Confluence pages");
            records.extend(pages);
        }
        Ok(records)
    }
}

/// Convert one content search result into a wiki record.
pub fn parse_page(page: &Value, base_url: &str) -> SourceRecord {
    let url = page
        .pointer("/_links/webui")
        .and_then(Value::as_str)
        .map(|path| format!("{}{}", base_url.trim_end_matches('/'), path));

    SourceRecord {
        id: page.get("id").and_then(Value::as_str).map(str::to_string),
        title: page.get("title").and_then(Value::as_str).map(str::to_string),
        body: page
            .pointer("/body/storage/value")
            .and_then(Value::as_str)
            .map(str::to_string),
        url,
        last_updated: page
            .pointer("/version/when")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        details: RecordDetails::Wiki(WikiFields {
            space: page
                .pointer("/space/key")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
    }
}
