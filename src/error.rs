use thiserror::Error;

/// Per-event failure classes. Everything here is recoverable: the
/// orchestration catches it, logs it, and posts the fixed fallback reply.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("no usable messages found in the thread")]
    EmptyConversation,

    #[error("received empty response from language model")]
    EmptyResponse,

    /// Network-level failure talking to Slack or the completion provider.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The remote endpoint answered, but with an error payload.
    #[error("{endpoint} failed: {detail}")]
    Api {
        endpoint: &'static str,
        detail: String,
    },
}
