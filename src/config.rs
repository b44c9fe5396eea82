//! Configuration module for the LINE family translator.
//!
//! Handles loading configuration from environment variables and .env files.
//! Secrets are kept optional at load time so the service can still boot (and
//! answer `/status`) on a partially configured deployment; components fail
//! with a descriptive error at the point of use instead.

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI API key used by the translation client.
    pub openai_api_key: Option<String>,

    /// OpenAI model name for translation requests.
    pub openai_model: String,

    /// LINE channel secret used to verify webhook signatures.
    pub line_channel_secret: Option<String>,

    /// LINE channel access token used by the reply client.
    pub line_channel_access_token: Option<String>,

    /// Base URL of the Upstash-style KV REST API.
    pub kv_rest_api_url: Option<String>,

    /// Bearer token for the KV REST API.
    pub kv_rest_api_token: Option<String>,

    /// PIN required by the glossary admin endpoints (x-admin-pin header).
    pub admin_pin: Option<String>,

    /// KV key under which the glossary JSON array is stored.
    pub glossary_key: String,

    /// TTL in seconds for the in-process glossary read cache.
    pub glossary_cache_ttl_secs: u64,

    /// Group/room IDs that get the colloquial family prompt.
    /// All other conversations fall back to the generic prompt.
    pub family_group_ids: Vec<String>,

    /// Address to bind the HTTP server on.
    pub host: std::net::Ipv4Addr,

    /// Port to bind the HTTP server on.
    pub port: u16,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `OPENAI_API_KEY`: OpenAI API key
    /// - `OPENAI_MODEL`: Model name (default: gpt-4o-mini)
    /// - `LINE_CHANNEL_SECRET`: Webhook signature secret
    /// - `LINE_CHANNEL_ACCESS_TOKEN`: Reply API token
    /// - `KV_REST_API_URL` / `KV_REST_API_TOKEN`: KV store endpoint
    /// - `ADMIN_PIN` (or legacy `ADMIN_PASS`): Admin endpoint PIN
    /// - `FAMILY_GLOSSARY_KEY`: KV key for the glossary (default: family_glossary_v1)
    /// - `FAMILY_GLOSSARY_CACHE_TTL`: Read cache TTL in seconds (default: 20)
    /// - `FAMILY_GROUP_IDS`: Comma-separated group IDs for the family prompt
    /// - `HOST`: Bind address (default: 0.0.0.0)
    /// - `PORT`: Bind port (default: 3000)
    pub fn load() -> Result<Self> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let openai_api_key = env_non_empty("OPENAI_API_KEY");

        let openai_model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let line_channel_secret = env_non_empty("LINE_CHANNEL_SECRET");
        let line_channel_access_token = env_non_empty("LINE_CHANNEL_ACCESS_TOKEN");

        let kv_rest_api_url = env_non_empty("KV_REST_API_URL");
        let kv_rest_api_token = env_non_empty("KV_REST_API_TOKEN");

        // ADMIN_PASS is the legacy variable name, kept as a fallback
        let admin_pin = env_non_empty("ADMIN_PIN").or_else(|| env_non_empty("ADMIN_PASS"));

        let glossary_key = std::env::var("FAMILY_GLOSSARY_KEY")
            .unwrap_or_else(|_| "family_glossary_v1".to_string());

        let glossary_cache_ttl_secs: u64 = std::env::var("FAMILY_GLOSSARY_CACHE_TTL")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .context("FAMILY_GLOSSARY_CACHE_TTL must be a valid number of seconds")?;

        let family_group_ids = std::env::var("FAMILY_GROUP_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let host: std::net::Ipv4Addr = std::env::var("HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("HOST must be a valid IPv4 address: {}", e))?;

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid port number")?;

        Ok(Config {
            openai_api_key,
            openai_model,
            line_channel_secret,
            line_channel_access_token,
            kv_rest_api_url,
            kv_rest_api_token,
            admin_pin,
            glossary_key,
            glossary_cache_ttl_secs,
            family_group_ids,
            host,
            port,
        })
    }
}

/// Reads an environment variable, treating empty/whitespace values as absent.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
