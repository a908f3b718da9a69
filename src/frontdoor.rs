//! Conversational front door.
//!
//! Turns one inbound chat message into exactly one delivered reply:
//!
//! ```text
//! received → cleaning ─┬─ empty ──────────────────────────────→ replied-clarify
//!                      └─ thinking-indicator-posted → engine-running ─┬→ replied-final
//!                                                                     ├→ replied-timeout
//!                                                                     └→ replied-error
//! ```
//!
//! The engine runs in its own task under a timeout. On timeout the task
//! is aborted and its result discarded. The final text replaces the
//! thinking indicator; if that update fails it is posted as a new
//! message instead.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use pulse_core::answer::Answerer;

use crate::config::AnswerConfig;

/// One question addressed to the bot.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub text: String,
    pub sender_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub message_id: String,
}

impl InboundMessage {
    /// Replies go into the existing thread, or start one on the message.
    pub fn reply_thread(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.message_id)
    }
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Post `text` and return the id of the posted message.
    async fn post_message(&self, channel: &str, thread: Option<&str>, text: &str) -> Result<String>;

    /// Replace the text of a previously posted message.
    async fn update_message(
        &self,
        channel: &str,
        thread: Option<&str>,
        message_id: &str,
        text: &str,
    ) -> Result<()>;
}

/// Terminal state of one [`FrontDoor::handle`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clarified,
    Answered,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FrontDoorSettings {
    pub timeout: Duration,
    pub thinking_message: String,
    pub clarify_message: String,
    pub timeout_message: String,
    pub failure_message: String,
    pub bot_user_id: Option<String>,
}

impl FrontDoorSettings {
    pub fn from_config(answer: &AnswerConfig, bot_user_id: Option<String>) -> Self {
        Self {
            timeout: Duration::from_secs(answer.timeout_secs),
            thinking_message: answer.thinking_message.clone(),
            clarify_message: answer.clarify_message.clone(),
            timeout_message: answer.timeout_message.clone(),
            failure_message: answer.failure_message.clone(),
            bot_user_id,
        }
    }
}

pub struct FrontDoor {
    answerer: Arc<dyn Answerer>,
    transport: Arc<dyn MessageTransport>,
    settings: FrontDoorSettings,
}

impl FrontDoor {
    pub fn new(
        answerer: Arc<dyn Answerer>,
        transport: Arc<dyn MessageTransport>,
        settings: FrontDoorSettings,
    ) -> Self {
        Self {
            answerer,
            transport,
            settings,
        }
    }

    pub async fn handle(&self, message: &InboundMessage) -> Outcome {
        let channel = message.channel_id.as_str();
        let thread = Some(message.reply_thread());
        let question = clean_question(&message.text, self.settings.bot_user_id.as_deref());

        if question.is_empty() {
            tracing::info!(channel, sender = %message.sender_id, "empty question; asking for clarification");
            if let Err(e) = self
                .transport
                .post_message(channel, thread, &self.settings.clarify_message)
                .await
            {
                tracing::error!(channel, error = %format!("{:#}", e), "failed to post clarification");
            }
            return Outcome::Clarified;
        }

        let indicator = match self
            .transport
            .post_message(channel, thread, &self.settings.thinking_message)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(channel, error = %format!("{:#}", e), "failed to post thinking indicator");
                None
            }
        };

        let answerer = Arc::clone(&self.answerer);
        let asked = question.clone();
        let mut task = tokio::spawn(async move { answerer.answer(&asked).await });

        let (reply, outcome) = match tokio::time::timeout(self.settings.timeout, &mut task).await {
            Ok(Ok(answer)) => (answer, Outcome::Answered),
            Ok(Err(e)) => {
                tracing::error!(channel, error = %e, "answering task failed");
                (self.settings.failure_message.clone(), Outcome::Failed)
            }
            Err(_) => {
                task.abort();
                tracing::warn!(
                    channel,
                    timeout_secs = self.settings.timeout.as_secs_f64(),
                    "answering timed out"
                );
                (self.settings.timeout_message.clone(), Outcome::TimedOut)
            }
        };

        self.deliver(channel, thread, indicator.as_deref(), &reply).await;
        tracing::info!(channel, sender = %message.sender_id, outcome = ?outcome, "question handled");
        outcome
    }

    async fn deliver(&self, channel: &str, thread: Option<&str>, indicator: Option<&str>, text: &str) {
        if let Some(id) = indicator {
            match self.transport.update_message(channel, thread, id, text).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(channel, error = %format!("{:#}", e), "update failed; posting a new message")
                }
            }
        }
        if let Err(e) = self.transport.post_message(channel, thread, text).await {
            tracing::error!(channel, error = %format!("{:#}", e), "failed to deliver reply");
        }
    }
}

fn leading_mentions() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:<@[A-Z0-9]+(?:\|[^>]*)?>\s*)+").expect("valid regex"))
}

/// Strip leading mention markup (`<@U123>` or `<@U123|name>`) and any
/// mention of the bot itself, then trim. A mid-text bot mention and the
/// spaces around it collapse to a single space.
pub fn clean_question(text: &str, bot_user_id: Option<&str>) -> String {
    let mut cleaned = leading_mentions().replace(text, "").into_owned();
    if let Some(bot) = bot_user_id.filter(|b| !b.is_empty()) {
        let pattern = format!(r"[ \t]*<@{}(?:\|[^>]*)?>[ \t]*", regex::escape(bot));
        if let Ok(re) = Regex::new(&pattern) {
            cleaned = re.replace_all(&cleaned, " ").into_owned();
        }
    }
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Post(String),
        Update(String, String),
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<Call>>,
        fail_updates: bool,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageTransport for RecordingTransport {
        async fn post_message(&self, _channel: &str, _thread: Option<&str>, text: &str) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Post(text.to_string()));
            Ok(format!("m{}", calls.len()))
        }

        async fn update_message(
            &self,
            _channel: &str,
            _thread: Option<&str>,
            message_id: &str,
            text: &str,
        ) -> Result<()> {
            if self.fail_updates {
                return Err(anyhow!("message_not_found"));
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Update(message_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl Answerer for Fixed {
        async fn answer(&self, question: &str) -> String {
            format!("{}: {}", self.0, question)
        }
    }

    struct Slow;

    #[async_trait]
    impl Answerer for Slow {
        async fn answer(&self, _question: &str) -> String {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "too late".to_string()
        }
    }

    struct Panics;

    #[async_trait]
    impl Answerer for Panics {
        async fn answer(&self, _question: &str) -> String {
            panic!("engine bug")
        }
    }

    fn settings(timeout: Duration) -> FrontDoorSettings {
        FrontDoorSettings {
            timeout,
            thinking_message: "Thinking...".into(),
            clarify_message: "Please ask a question.".into(),
            timeout_message: "Taking too long.".into(),
            failure_message: "Something went wrong.".into(),
            bot_user_id: Some("UBOT".into()),
        }
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            text: text.to_string(),
            sender_id: "U1".into(),
            channel_id: "C1".into(),
            thread_id: None,
            message_id: "1700000000.000100".into(),
        }
    }

    #[test]
    fn test_clean_question() {
        assert_eq!(clean_question("<@UBOT> status of ID?", None), "status of ID?");
        assert_eq!(clean_question("  <@UBOT|pulse>   <@U2>  hi ", None), "hi");
        assert_eq!(clean_question("ask <@UBOT> about WL", Some("UBOT")), "ask about WL");
        assert_eq!(clean_question("ask\t<@UBOT|pulse>  about WL", Some("UBOT")), "ask about WL");
        assert_eq!(clean_question("mention <@U2> stays", Some("UBOT")), "mention <@U2> stays");
        assert_eq!(clean_question("<@UBOT>   ", None), "");
    }

    #[test]
    fn test_reply_thread_prefers_existing_thread() {
        let mut m = message("x");
        assert_eq!(m.reply_thread(), "1700000000.000100");
        m.thread_id = Some("1690000000.000001".into());
        assert_eq!(m.reply_thread(), "1690000000.000001");
    }

    #[tokio::test]
    async fn test_empty_question_clarifies_without_engine() {
        let transport = Arc::new(RecordingTransport::default());
        let door = FrontDoor::new(Arc::new(Panics), transport.clone(), settings(Duration::from_secs(1)));
        let outcome = door.handle(&message("<@UBOT>")).await;
        assert_eq!(outcome, Outcome::Clarified);
        assert_eq!(transport.calls(), vec![Call::Post("Please ask a question.".into())]);
    }

    #[tokio::test]
    async fn test_answer_replaces_indicator() {
        let transport = Arc::new(RecordingTransport::default());
        let door = FrontDoor::new(Arc::new(Fixed("ok")), transport.clone(), settings(Duration::from_secs(5)));
        let outcome = door.handle(&message("<@UBOT> login bug status")).await;
        assert_eq!(outcome, Outcome::Answered);
        assert_eq!(
            transport.calls(),
            vec![
                Call::Post("Thinking...".into()),
                Call::Update("m1".into(), "ok: login bug status".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_replies_with_apology() {
        let transport = Arc::new(RecordingTransport::default());
        let timeout = Duration::from_millis(50);
        let door = FrontDoor::new(Arc::new(Slow), transport.clone(), settings(timeout));
        let started = Instant::now();
        let outcome = door.handle(&message("status?")).await;
        assert_eq!(outcome, Outcome::TimedOut);
        assert!(started.elapsed() < timeout + Duration::from_secs(2));
        assert_eq!(
            transport.calls().last(),
            Some(&Call::Update("m1".into(), "Taking too long.".into()))
        );
    }

    #[tokio::test]
    async fn test_engine_panic_degrades_to_failure_message() {
        let transport = Arc::new(RecordingTransport::default());
        let door = FrontDoor::new(Arc::new(Panics), transport.clone(), settings(Duration::from_secs(5)));
        assert_eq!(door.handle(&message("status?")).await, Outcome::Failed);
        assert_eq!(
            transport.calls().last(),
            Some(&Call::Update("m1".into(), "Something went wrong.".into()))
        );
    }

    #[tokio::test]
    async fn test_failed_update_falls_back_to_post() {
        let transport = Arc::new(RecordingTransport {
            fail_updates: true,
            ..Default::default()
        });
        let door = FrontDoor::new(Arc::new(Fixed("ok")), transport.clone(), settings(Duration::from_secs(5)));
        door.handle(&message("status?")).await;
        assert_eq!(
            transport.calls(),
            vec![
                Call::Post("Thinking...".into()),
                Call::Post("ok: status?".into()),
            ]
        );
    }
}
