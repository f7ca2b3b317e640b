use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::conversation::{build_conversation, should_ignore, TriggerMatcher};
use crate::error::EventError;
use crate::llm::ChatMessage;
use crate::slack::RawMessage;

/// Fixed user-facing reply for any per-event failure.
pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't process that request right now.";

/// Returns the ordered message history of a thread.
#[async_trait]
pub trait ThreadFetcher: Send + Sync {
    async fn fetch_thread(
        &self,
        channel: &str,
        anchor_ts: &str,
    ) -> Result<Vec<RawMessage>, EventError>;
}

/// Sends a conversation to the completion provider.
#[async_trait]
pub trait CompletionInvoker: Send + Sync {
    async fn invoke_completion(&self, messages: &[ChatMessage]) -> Result<String, EventError>;
}

/// Posts a reply back into a channel, threaded when `thread_ts` is given.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn dispatch_reply(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), EventError>;
}

/// How an event reached the pipeline. Trigger-phrase activation defers to
/// the mention path when the text also mentions the bot, so one human
/// message is never processed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Mention,
    TriggerPhrase,
}

/// Per-event orchestration: gate, fetch the thread, build the
/// conversation, invoke the completion, post the reply. All state is
/// immutable after construction; each event runs in its own task.
pub struct EventPipeline<F, C, D> {
    fetcher: F,
    invoker: C,
    dispatcher: D,
    bot_user_id: String,
    matcher: TriggerMatcher,
    system_prompt: Option<String>,
}

impl<F, C, D> EventPipeline<F, C, D>
where
    F: ThreadFetcher,
    C: CompletionInvoker,
    D: ReplyDispatcher,
{
    pub fn new(
        fetcher: F,
        invoker: C,
        dispatcher: D,
        bot_user_id: String,
        matcher: TriggerMatcher,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            invoker,
            dispatcher,
            bot_user_id,
            matcher,
            system_prompt,
        }
    }

    pub fn matcher(&self) -> &TriggerMatcher {
        &self.matcher
    }

    /// Process one inbound event end to end. Never returns an error:
    /// recoverable failures become the fallback reply, and failures while
    /// posting the fallback are logged and swallowed.
    pub async fn handle(&self, event: RawMessage, activation: Activation) {
        if should_ignore(&event, &self.bot_user_id) {
            return;
        }
        if activation == Activation::TriggerPhrase && self.matcher.mentions_bot(&event.text) {
            // The app_mention delivery of this message handles it.
            return;
        }

        info!(
            channel = event.channel.as_deref().unwrap_or("-"),
            ts = %event.ts,
            "Processing event"
        );

        // A reply stays in the thread only when the event itself was in one.
        let reply_anchor = event.thread_ts.clone();
        let channel = event.channel.clone();

        let outcome = self.process(&event).await;

        let Some(channel) = channel else {
            warn!("Event has no channel; nothing to reply to");
            return;
        };

        match outcome {
            Ok(reply) => {
                if let Err(e) = self
                    .dispatcher
                    .dispatch_reply(&channel, &reply, reply_anchor.as_deref())
                    .await
                {
                    error!("Failed to post reply: {e}");
                }
            }
            Err(e) => {
                error!(ts = %event.ts, "Failed to process event: {e}");
                if let Err(e) = self
                    .dispatcher
                    .dispatch_reply(&channel, FALLBACK_REPLY, reply_anchor.as_deref())
                    .await
                {
                    error!("Failed to post fallback reply: {e}");
                }
            }
        }
    }

    async fn process(&self, event: &RawMessage) -> Result<String, EventError> {
        let thread = self.collect_thread(event).await?;
        let messages = build_conversation(
            &thread,
            &self.bot_user_id,
            self.system_prompt.as_deref(),
            &self.matcher,
        )?;
        self.invoker.invoke_completion(&messages).await
    }

    /// Fetch the full thread history for the event, or fall back to the
    /// single event when the channel or anchor timestamp is missing.
    async fn collect_thread(&self, event: &RawMessage) -> Result<Vec<RawMessage>, EventError> {
        match (event.channel.as_deref(), event.thread_anchor()) {
            (Some(channel), Some(anchor)) => self.fetcher.fetch_thread(channel, anchor).await,
            _ => Ok(vec![event.clone()]),
        }
    }
}
