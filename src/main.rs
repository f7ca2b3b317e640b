mod bot;
mod config;
mod conversation;
mod error;
mod llm;
mod server;
mod slack;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::EventPipeline;
use crate::config::Config;
use crate::conversation::TriggerMatcher;
use crate::llm::LlmClient;
use crate::slack::SlackClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pcmbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let trigger_phrase = config.normalized_trigger();

    info!("Configuration loaded successfully");
    info!("  Provider: {}", config.provider);
    info!("  Trigger phrase: {}", trigger_phrase);
    info!("  Port: {}", config.port);

    let llm = LlmClient::from_config(&config).context("Failed to build completion client")?;
    info!("  Model: {}", llm.model());

    // Resolve the bot's own identity once, before serving any event.
    let slack = SlackClient::new(config.slack_bot_token.clone());
    let bot_user_id = slack
        .auth_test()
        .await
        .context("Failed to resolve bot identity via auth.test")?;
    info!("  Bot user id: {}", bot_user_id);

    let matcher = TriggerMatcher::new(&bot_user_id, &trigger_phrase)
        .context("Failed to compile trigger patterns")?;

    let pipeline = Arc::new(EventPipeline::new(
        slack.clone(),
        llm,
        slack,
        bot_user_id,
        matcher,
        config.system_prompt.clone(),
    ));

    info!("Bot is starting...");
    server::run(pipeline, config.port).await
}
