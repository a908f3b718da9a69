//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! Secrets never live in the file; providers and sources read them from
//! environment variables when they are constructed.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use pulse_core::normalize::TruncationLimits;
use pulse_core::policy::ProjectMatch;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub truncation: TruncationLimits,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `sqlite` (persistent) or `memory`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
    /// Results must score strictly above this cosine similarity.
    #[serde(default)]
    pub min_similarity: f32,
}

fn default_index_backend() -> String {
    "sqlite".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            min_similarity: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Base URL for issue hyperlinks. Falls back to the Jira base URL.
    #[serde(default)]
    pub citation_base_url: Option<String>,
}

fn default_top_k() -> usize {
    8
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            citation_base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Override the provider's API base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            temperature: default_temperature(),
            url: None,
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_answer_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_thinking_message")]
    pub thinking_message: String,
    #[serde(default = "default_clarify_message")]
    pub clarify_message: String,
    #[serde(default = "default_timeout_message")]
    pub timeout_message: String,
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_answer_timeout(),
            thinking_message: default_thinking_message(),
            clarify_message: default_clarify_message(),
            timeout_message: default_timeout_message(),
            failure_message: default_failure_message(),
        }
    }
}

fn default_answer_timeout() -> u64 {
    120
}
fn default_thinking_message() -> String {
    ":hourglass_flowing_sand: Thinking...".to_string()
}
fn default_clarify_message() -> String {
    "It looks like you didn't ask me anything. Please try again with a question!".to_string()
}
fn default_timeout_message() -> String {
    "Sorry, I'm taking too long to think. Try again in a bit.".to_string()
}
fn default_failure_message() -> String {
    "Sorry, something went wrong while answering. Please try again.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// Project keys questions may be scoped to (e.g. `["ID", "WL", "MS"]`).
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub project_match: ProjectMatch,
    #[serde(default = "default_blocker_labels")]
    pub blocker_labels: Vec<String>,
    #[serde(default = "default_blocker_statuses")]
    pub blocker_statuses: Vec<String>,
    /// Summary/description keywords. Empty disables keyword matching.
    #[serde(default)]
    pub blocker_keywords: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            project_match: ProjectMatch::default(),
            blocker_labels: default_blocker_labels(),
            blocker_statuses: default_blocker_statuses(),
            blocker_keywords: Vec::new(),
        }
    }
}

fn default_blocker_labels() -> Vec<String> {
    vec!["blocker".to_string(), "blocked".to_string()]
}
fn default_blocker_statuses() -> Vec<String> {
    vec!["Blocked".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    /// The bot's own user id; its mentions are stripped and its messages ignored.
    #[serde(default)]
    pub bot_user_id: Option<String>,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_slack_api_base(),
            bot_user_id: None,
            max_message_length: default_max_message_length(),
            signature_tolerance_secs: default_signature_tolerance(),
        }
    }
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}
fn default_max_message_length() -> usize {
    4000
}
fn default_signature_tolerance() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_on_startup")]
    pub on_startup: bool,
    /// Seconds between background refreshes while serving. 0 disables.
    #[serde(default)]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            on_startup: default_on_startup(),
            refresh_interval_secs: 0,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_on_startup() -> bool {
    true
}
fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub jira: Option<JiraSourceConfig>,
    pub github: Option<GithubSourceConfig>,
    pub confluence: Option<ConfluenceSourceConfig>,
    pub json: Option<JsonSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JiraSourceConfig {
    /// e.g. `https://acme.atlassian.net`
    pub base_url: String,
    pub projects: Vec<String>,
    #[serde(default = "default_jira_page_size")]
    pub page_size: usize,
    /// Cap per project. Unlimited when absent.
    #[serde(default)]
    pub max_issues: Option<usize>,
    /// Custom field id of the "Epic Link" field. Discovered when absent.
    #[serde(default)]
    pub epic_link_field: Option<String>,
}

fn default_jira_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubSourceConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    /// `owner/name` pairs.
    pub repos: Vec<String>,
    #[serde(default = "default_max_pull_requests")]
    pub max_pull_requests: usize,
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_max_pull_requests() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfluenceSourceConfig {
    /// e.g. `https://acme.atlassian.net/wiki`
    pub base_url: String,
    pub spaces: Vec<String>,
    #[serde(default = "default_confluence_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub max_pages: Option<usize>,
}

fn default_confluence_page_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct JsonSourceConfig {
    /// A JSON array of records, each tagged with `source_kind`.
    pub path: PathBuf,
}

impl Config {
    /// Base URL used when hyperlinking issue keys in answers.
    pub fn citation_base_url(&self) -> String {
        self.retrieval
            .citation_base_url
            .clone()
            .or_else(|| self.sources.jira.as_ref().map(|j| j.base_url.clone()))
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!("Unknown index backend: '{}'. Must be sqlite or memory.", other),
    }
    if !(-1.0..=1.0).contains(&config.index.min_similarity) {
        bail!("index.min_similarity must be in [-1.0, 1.0]");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    let t = &config.truncation;
    if t.issue_description == 0 || t.pull_request_body == 0 || t.wiki_body == 0 {
        bail!("truncation limits must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    if config.answer.timeout_secs == 0 {
        bail!("answer.timeout_secs must be > 0");
    }
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.slack.max_message_length == 0 {
        bail!("slack.max_message_length must be > 0");
    }

    if let Some(jira) = &config.sources.jira {
        if jira.projects.is_empty() {
            bail!("sources.jira.projects must not be empty");
        }
        if jira.page_size == 0 {
            bail!("sources.jira.page_size must be > 0");
        }
    }
    if let Some(github) = &config.sources.github {
        if github.repos.iter().any(|r| !r.contains('/')) {
            bail!("sources.github.repos entries must be 'owner/name'");
        }
    }
    if let Some(confluence) = &config.sources.confluence {
        if confluence.page_size == 0 {
            bail!("sources.confluence.page_size must be > 0");
        }
    }

    Ok(())
}
