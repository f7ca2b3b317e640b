use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::bot::{Activation, CompletionInvoker, EventPipeline, ReplyDispatcher, ThreadFetcher};
use crate::slack::RawMessage;

/// Outer Events API envelope. Signature verification and delivery retries
/// are handled by the platform side of the contract, not here.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<InboundEvent>,
}

#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    message: RawMessage,
}

pub async fn run<F, C, D>(pipeline: Arc<EventPipeline<F, C, D>>, port: u16) -> Result<()>
where
    F: ThreadFetcher + 'static,
    C: CompletionInvoker + 'static,
    D: ReplyDispatcher + 'static,
{
    let app = router(pipeline);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {addr}");
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn router<F, C, D>(pipeline: Arc<EventPipeline<F, C, D>>) -> Router
where
    F: ThreadFetcher + 'static,
    C: CompletionInvoker + 'static,
    D: ReplyDispatcher + 'static,
{
    Router::new()
        .route("/slack/events", post(slack_events::<F, C, D>))
        .route("/healthz", get(healthz))
        .with_state(pipeline)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Slack Events API entry point. Acks immediately; actual processing runs
/// in a spawned task so the 3-second delivery window never re-fires.
async fn slack_events<F, C, D>(
    State(pipeline): State<Arc<EventPipeline<F, C, D>>>,
    Json(body): Json<Value>,
) -> Json<Value>
where
    F: ThreadFetcher + 'static,
    C: CompletionInvoker + 'static,
    D: ReplyDispatcher + 'static,
{
    let envelope: EventEnvelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Ignoring undecodable event payload: {e}");
            return Json(json!({ "ok": true }));
        }
    };

    match envelope.kind.as_str() {
        "url_verification" => Json(json!({
            "challenge": envelope.challenge.unwrap_or_default(),
        })),
        "event_callback" => {
            if let Some(event) = envelope.event {
                dispatch_event(pipeline, event);
            }
            Json(json!({ "ok": true }))
        }
        other => {
            debug!("Ignoring envelope type {other}");
            Json(json!({ "ok": true }))
        }
    }
}

/// Route an inner event to the pipeline: `app_mention` always activates;
/// a plain `message` only when it carries the trigger phrase.
fn dispatch_event<F, C, D>(pipeline: Arc<EventPipeline<F, C, D>>, event: InboundEvent)
where
    F: ThreadFetcher + 'static,
    C: CompletionInvoker + 'static,
    D: ReplyDispatcher + 'static,
{
    let activation = match event.kind.as_str() {
        "app_mention" => Some(Activation::Mention),
        "message" if pipeline.matcher().matches_trigger(&event.message.text) => {
            Some(Activation::TriggerPhrase)
        }
        _ => None,
    };

    if let Some(activation) = activation {
        tokio::spawn(async move {
            pipeline.handle(event.message, activation).await;
        });
    }
}
