//! LINE Family Translator
//!
//! A LINE bot that relays group chat messages through an OpenAI completion
//! call and replies with a zh↔vi translation, biased by a shared family
//! glossary stored in an Upstash-compatible KV store.

mod config;
mod glossary;
mod kv;
mod lang;
mod line;
mod prompt;
mod translator;
mod web;
mod webhook;

use anyhow::{Context, Result};
use config::Config;
use glossary::GlossaryStore;
use kv::{KvStore, UpstashKv};
use line::LineClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use translator::Translator;
use web::AppState;
use webhook::WebhookPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging - use RUST_LOG env var, defaulting to info level
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("line_translator=info")),
        )
        .init();

    // Load configuration
    let config = Config::load()?;

    if config.line_channel_secret.is_none() {
        warn!("LINE_CHANNEL_SECRET not set; webhook deliveries will be rejected");
    }
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; translations will fail");
    }

    // Construct the dependency graph: KV -> glossary -> translator -> pipeline
    let kv_client = UpstashKv::new(
        config.kv_rest_api_url.clone(),
        config.kv_rest_api_token.clone(),
    );
    if !kv_client.is_configured() {
        warn!("KV store not configured; glossary operations will fail");
    }
    let kv: Arc<dyn KvStore> = Arc::new(kv_client);

    let glossary = GlossaryStore::new(
        kv.clone(),
        &config.glossary_key,
        Duration::from_secs(config.glossary_cache_ttl_secs),
    );

    let translator = Arc::new(Translator::new(
        config.openai_api_key.clone(),
        &config.openai_model,
        glossary.clone(),
    ));
    let reply_sink = Arc::new(LineClient::new(config.line_channel_access_token.clone()));

    let pipeline = WebhookPipeline::new(
        translator,
        reply_sink,
        config.family_group_ids.iter().cloned(),
    );
    info!(
        "Family prompt enabled for {} group(s), model {}",
        config.family_group_ids.len(),
        config.openai_model
    );

    let addr = SocketAddr::from((config.host, config.port));
    let state = Arc::new(AppState {
        config,
        glossary,
        pipeline,
        kv,
    });

    let app = web::router(state);

    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
