//! Generative model providers.
//!
//! Implements [`Generator`] for:
//! - **[`GeminiGenerator`]**: `streamGenerateContent?alt=sse`, key from `GOOGLE_API_KEY`.
//! - **[`OpenAIGenerator`]**: streamed chat completions, key from `OPENAI_API_KEY`.
//! - **[`DisabledGenerator`]**: always errors.
//!
//! Both network providers stream server-sent events; [`SseDecoder`]
//! reassembles event payloads across arbitrary chunk boundaries and
//! [`sse_text_stream`] maps each payload to a text chunk.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::generate::{Generator, TextStream};

use crate::config::GenerationConfig;
use crate::retry::{send_with_retry, RetryPolicy};

const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
const OPENAI_API_BASE: &str = "https://api.openai.com";

pub fn create_generator(config: &GenerationConfig, retry: RetryPolicy) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config, retry)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config, retry)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn stream(&self, _prompt: &str) -> Result<TextStream> {
        bail!("Generation provider is disabled")
    }
}

// ============ Gemini ============

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            temperature: config.temperature,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            retry,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let endpoint = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });
        let response = send_with_retry(&self.retry, "Gemini generate", || {
            self.client
                .post(&endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        Ok(sse_text_stream(response.bytes_stream(), gemini_chunk_text))
    }
}

/// Text of one Gemini stream event: all `parts[].text` of the first candidate.
pub fn gemini_chunk_text(payload: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(payload)?;
    if let Some(error) = json.get("error") {
        bail!("Gemini error: {}", error);
    }
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        bail!("Gemini blocked the prompt: {}", reason);
    }
    let parts = match json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    {
        Some(parts) => parts,
        None => return Ok(None),
    };
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Ok(Some(text))
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            temperature: config.temperature,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            retry,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let endpoint = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "stream": true,
        });
        let response = send_with_retry(&self.retry, "OpenAI chat completions", || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        Ok(sse_text_stream(response.bytes_stream(), openai_chunk_text))
    }
}

/// Text of one chat-completions stream event: `choices[0].delta.content`.
pub fn openai_chunk_text(payload: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(payload)?;
    if let Some(error) = json.get("error") {
        bail!("OpenAI error: {}", error);
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string))
}

// ============ Server-sent events ============

/// Incremental SSE parser. Feed raw bytes, get back the `data` payload of
/// every event completed so far (multi-line data joined with `\n`).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.consume_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.consume_line(&String::from_utf8_lossy(&rest), &mut events);
        }
        self.consume_line("", &mut events);
        events
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<String>) {
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
    }
}

type ChunkExtractor = fn(&str) -> Result<Option<String>>;

/// Turn an SSE byte stream into a text stream. A `[DONE]` payload ends
/// the stream; the first error ends it after being yielded.
pub fn sse_text_stream<S, B, E>(body: S, extract: ChunkExtractor) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (
        body.boxed(),
        SseDecoder::default(),
        VecDeque::<String>::new(),
        false,
    );

    stream::unfold(state, move |(mut body, mut decoder, mut pending, mut done)| async move {
        loop {
            if let Some(payload) = pending.pop_front() {
                if payload.trim() == "[DONE]" {
                    return None;
                }
                match extract(&payload) {
                    Ok(Some(text)) if !text.is_empty() => {
                        return Some((Ok(text), (body, decoder, pending, done)));
                    }
                    Ok(_) => continue,
                    Err(e) => return Some((Err(e), (body, decoder, VecDeque::new(), true))),
                }
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(bytes)) => pending.extend(decoder.push(bytes.as_ref())),
                Some(Err(e)) => {
                    let err = anyhow!("stream interrupted: {}", e);
                    return Some((Err(err), (body, decoder, VecDeque::new(), true)));
                }
                None => {
                    done = true;
                    pending.extend(decoder.finish());
                }
            }
        }
    })
    .boxed()
}
