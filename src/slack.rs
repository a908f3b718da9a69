//! Slack adapter: request signing, event parsing and the Web API
//! transport.
//!
//! # Request Verification
//!
//! Slack signs every request with the app's signing secret:
//!
//! ```text
//! basestring = "v0:" + X-Slack-Request-Timestamp + ":" + raw body
//! signature  = "v0=" + hex(HMAC-SHA256(signing_secret, basestring))
//! ```
//!
//! Requests older than the tolerance window are rejected to stop
//! replays.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::config::SlackConfig;
use crate::frontdoor::{InboundMessage, MessageTransport};
use crate::retry::{send_with_retry, RetryPolicy};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("request timestamp is not a number")]
    InvalidTimestamp,
    #[error("request timestamp is outside the tolerance window")]
    Stale,
    #[error("signature does not match")]
    Mismatch,
}

/// `v0=<hex>` signature for a request body.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
    let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if (now - sent_at).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    let expected = signature
        .strip_prefix("v0=")
        .and_then(|h| hex::decode(h).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Top-level Events API payload.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification {
        #[serde(default)]
        challenge: Option<String>,
    },
    EventCallback {
        #[serde(default)]
        event: Option<Value>,
    },
    #[serde(other)]
    Other,
}

/// Extract a question from an `event_callback` event.
///
/// Accepts `app_mention` events and direct messages. Bot-authored
/// messages, message subtypes (edits, joins) and the bot's own messages
/// are ignored.
pub fn inbound_from_event(event: &Value, bot_user_id: Option<&str>) -> Option<InboundMessage> {
    let str_of = |field: &str| event.get(field).and_then(Value::as_str);

    if str_of("bot_id").is_some() || str_of("subtype").is_some() {
        return None;
    }
    let sender = str_of("user")?;
    if bot_user_id == Some(sender) {
        return None;
    }
    match str_of("type")? {
        "app_mention" => {}
        "message" if str_of("channel_type") == Some("im") => {}
        _ => return None,
    }

    Some(InboundMessage {
        text: str_of("text").unwrap_or_default().to_string(),
        sender_id: sender.to_string(),
        channel_id: str_of("channel")?.to_string(),
        thread_id: str_of("thread_ts").map(str::to_string),
        message_id: str_of("ts")?.to_string(),
    })
}

/// Split `text` into chunks of at most `max_len` characters, breaking on
/// line boundaries. A single line longer than `max_len` is hard-split.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { current_len + 1 + line_len };
        if needed <= max_len {
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= max_len {
            current.push_str(line);
            current_len = line_len;
        } else {
            let chars: Vec<char> = line.chars().collect();
            let mut pieces = chars.chunks(max_len).map(|c| c.iter().collect::<String>()).peekable();
            while let Some(piece) = pieces.next() {
                if pieces.peek().is_some() {
                    chunks.push(piece);
                } else {
                    current_len = piece.chars().count();
                    current = piece;
                }
            }
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// [`MessageTransport`] over `chat.postMessage` / `chat.update`.
///
/// Long replies are chunked: the first chunk goes into the posted or
/// updated message, the rest follow in the same thread.
pub struct SlackTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
    max_message_length: usize,
    retry: RetryPolicy,
}

impl SlackTransport {
    /// Requires the `SLACK_BOT_TOKEN` environment variable.
    pub fn new(config: &SlackConfig, retry: RetryPolicy) -> Result<Self> {
        let token = std::env::var("SLACK_BOT_TOKEN")
            .map_err(|_| anyhow!("SLACK_BOT_TOKEN environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            max_message_length: config.max_message_length,
            retry,
        })
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.api_base, method);
        let response = send_with_retry(&self.retry, method, || {
            self.client.post(&url).bearer_auth(&self.token).json(&body)
        })
        .await?;
        let json: Value = response.json().await?;
        check_ok(method, json)
    }

    async fn post_chunk(&self, channel: &str, thread: Option<&str>, text: &str) -> Result<String> {
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread {
            body["thread_ts"] = Value::String(ts.to_string());
        }
        let json = self.call("chat.postMessage", body).await?;
        json.get("ts")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("chat.postMessage response missing ts"))
    }

    async fn post_rest(&self, channel: &str, thread: Option<&str>, rest: &[String]) -> Result<()> {
        for chunk in rest {
            self.post_chunk(channel, thread, chunk).await?;
        }
        Ok(())
    }
}

/// Slack reports API failures as `200 {"ok": false, "error": "..."}`.
fn check_ok(method: &str, json: Value) -> Result<Value> {
    if json.get("ok").and_then(Value::as_bool) == Some(true) {
        Ok(json)
    } else {
        let error = json
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        Err(anyhow!("{} failed: {}", method, error))
    }
}

#[async_trait]
impl MessageTransport for SlackTransport {
    async fn post_message(&self, channel: &str, thread: Option<&str>, text: &str) -> Result<String> {
        let chunks = split_message(text, self.max_message_length);
        let (first, rest) = chunks.split_first().ok_or_else(|| anyhow!("nothing to post"))?;
        let ts = self.post_chunk(channel, thread, first).await?;
        self.post_rest(channel, thread.or(Some(ts.as_str())), rest).await?;
        Ok(ts)
    }

    async fn update_message(
        &self,
        channel: &str,
        thread: Option<&str>,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        let chunks = split_message(text, self.max_message_length);
        let (first, rest) = chunks.split_first().ok_or_else(|| anyhow!("nothing to post"))?;
        self.call(
            "chat.update",
            serde_json::json!({ "channel": channel, "ts": message_id, "text": first }),
        )
        .await?;
        self.post_rest(channel, thread.or(Some(message_id)), rest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    #[test]
    fn test_signature_roundtrip_and_rejections() {
        let body = br#"{"type":"event_callback"}"#;
        let sig = compute_signature(SECRET, "1531420618", body);
        assert!(sig.starts_with("v0="));

        let ok = verify_signature(SECRET, Some("1531420618"), Some(&sig), body, 1531420618 + 10, 300);
        assert_eq!(ok, Ok(()));

        let tampered = verify_signature(SECRET, Some("1531420618"), Some(&sig), b"{}", 1531420618, 300);
        assert_eq!(tampered, Err(SignatureError::Mismatch));

        let stale = verify_signature(SECRET, Some("1531420618"), Some(&sig), body, 1531420618 + 301, 300);
        assert_eq!(stale, Err(SignatureError::Stale));

        let missing = verify_signature(SECRET, None, Some(&sig), body, 0, 300);
        assert_eq!(missing, Err(SignatureError::MissingHeader(TIMESTAMP_HEADER)));

        let garbage = verify_signature(SECRET, Some("1531420618"), Some("v1=zz"), body, 1531420618, 300);
        assert_eq!(garbage, Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_envelope_parsing() {
        let challenge: Envelope =
            serde_json::from_value(json!({ "type": "url_verification", "challenge": "abc" })).unwrap();
        assert!(matches!(challenge, Envelope::UrlVerification { challenge: Some(c) } if c == "abc"));

        let other: Envelope = serde_json::from_value(json!({ "type": "app_rate_limited" })).unwrap();
        assert!(matches!(other, Envelope::Other));
    }

    #[test]
    fn test_inbound_from_event() {
        let mention = json!({
            "type": "app_mention", "user": "U1", "channel": "C1",
            "text": "<@UBOT> status?", "ts": "1.0", "thread_ts": "0.5"
        });
        let m = inbound_from_event(&mention, Some("UBOT")).unwrap();
        assert_eq!(m.thread_id.as_deref(), Some("0.5"));
        assert_eq!(m.reply_thread(), "0.5");

        let dm = json!({ "type": "message", "channel_type": "im", "user": "U1", "channel": "D1", "text": "hi", "ts": "2.0" });
        assert!(inbound_from_event(&dm, None).is_some());

        let channel_message = json!({ "type": "message", "channel_type": "channel", "user": "U1", "channel": "C1", "text": "hi", "ts": "2.0" });
        assert!(inbound_from_event(&channel_message, None).is_none());

        let from_bot = json!({ "type": "message", "channel_type": "im", "bot_id": "B1", "user": "UBOT", "channel": "D1", "text": "answer", "ts": "3.0" });
        assert!(inbound_from_event(&from_bot, None).is_none());

        let own = json!({ "type": "message", "channel_type": "im", "user": "UBOT", "channel": "D1", "text": "x", "ts": "3.0" });
        assert!(inbound_from_event(&own, Some("UBOT")).is_none());

        let edit = json!({ "type": "message", "subtype": "message_changed", "channel_type": "im", "user": "U1", "channel": "D1", "ts": "4.0" });
        assert!(inbound_from_event(&edit, None).is_none());
    }

    #[test]
    fn test_split_message_on_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 100), vec![text.to_string()]);
        assert_eq!(split_message(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_message(text, 4), vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn test_split_message_hard_splits_long_lines() {
        let chunks = split_message("abcdefghij\nxy", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij", "xy"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(split_message("", 10), vec![String::new()]);
    }

    #[test]
    fn test_check_ok() {
        assert!(check_ok("chat.update", json!({ "ok": true, "ts": "1" })).is_ok());
        let err = check_ok("chat.update", json!({ "ok": false, "error": "message_not_found" })).unwrap_err();
        assert!(err.to_string().contains("message_not_found"));
    }
}
