use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::bot::{ReplyDispatcher, ThreadFetcher};
use crate::error::EventError;

/// Slack Web API base URL.
const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack message length limit for `chat.postMessage`.
const SLACK_MAX_LEN: usize = 4000;

/// One Slack message as delivered by the Events API or
/// `conversations.replies`. Decoded into a fixed shape at the boundary so
/// the pipeline never touches loose JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub text: String,
    /// Sender user id; absent for some automated messages.
    #[serde(default)]
    pub user: Option<String>,
    /// Present when the sender is a bot or app.
    #[serde(default)]
    pub bot_id: Option<String>,
    /// Event subtype tag (`message_changed`, `bot_message`, ...).
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub ts: String,
    /// Timestamp of the thread root, when the message lives in a thread.
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Present on inbound events, absent on thread-history entries.
    #[serde(default)]
    pub channel: Option<String>,
}

impl RawMessage {
    /// The thread to fetch: the enclosing thread's root, or this message
    /// itself when it is a thread root.
    pub fn thread_anchor(&self) -> Option<&str> {
        self.thread_ts
            .as_deref()
            .or((!self.ts.is_empty()).then_some(self.ts.as_str()))
    }
}

/// Thin client over the Slack Web API methods the bot needs.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
        }
    }

    /// Resolve the bot's own user id. Called once at startup; failure here
    /// is fatal.
    pub async fn auth_test(&self) -> Result<String, EventError> {
        let body = self.call("auth.test", &json!({})).await?;
        body["user_id"]
            .as_str()
            .map(str::to_string)
            .ok_or(EventError::Api {
                endpoint: "auth.test",
                detail: "no user_id in response".to_string(),
            })
    }

    /// Fetch the ordered message history of a thread.
    pub async fn conversations_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<RawMessage>, EventError> {
        let response = self
            .http
            .get(format!("{}/conversations.replies", SLACK_API_BASE))
            .bearer_auth(&self.token)
            .query(&[("channel", channel), ("ts", ts)])
            .send()
            .await?;

        let body: Value = response.json().await?;
        check_ok("conversations.replies", &body)?;

        let messages = body.get("messages").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(messages).map_err(|e| EventError::Api {
            endpoint: "conversations.replies",
            detail: format!("unexpected messages payload: {}", e),
        })
    }

    /// Post a message, threading it under `thread_ts` when given. Replies
    /// longer than the Slack limit are split on line or word boundaries.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), EventError> {
        for chunk in split_message(text, SLACK_MAX_LEN) {
            let mut body = json!({
                "channel": channel,
                "text": chunk,
            });
            if let Some(ts) = thread_ts {
                body["thread_ts"] = json!(ts);
            }
            self.call("chat.postMessage", &body).await?;
        }
        Ok(())
    }

    async fn call(&self, method: &'static str, body: &Value) -> Result<Value, EventError> {
        debug!("Calling Slack API method {}", method);
        let response = self
            .http
            .post(format!("{}/{}", SLACK_API_BASE, method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let body: Value = response.json().await?;
        check_ok(method, &body)?;
        Ok(body)
    }
}

fn check_ok(method: &'static str, body: &Value) -> Result<(), EventError> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    Err(EventError::Api {
        endpoint: method,
        detail: body["error"].as_str().unwrap_or("unknown").to_string(),
    })
}

/// Split a long message into chunks of up to `max_len` bytes, preferring
/// newline then space boundaries, and never cutting inside a UTF-8
/// character.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let mut end = max_len;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let cut = rest[..end]
            .rfind('\n')
            .or_else(|| rest[..end].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(end);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }

    chunks
}

#[async_trait]
impl ThreadFetcher for SlackClient {
    async fn fetch_thread(
        &self,
        channel: &str,
        anchor_ts: &str,
    ) -> Result<Vec<RawMessage>, EventError> {
        self.conversations_replies(channel, anchor_ts).await
    }
}

#[async_trait]
impl ReplyDispatcher for SlackClient {
    async fn dispatch_reply(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), EventError> {
        self.post_message(channel, text, thread_ts).await
    }
}
