//! Key-value store client for the Upstash-compatible REST API.
//!
//! The glossary is persisted as one JSON string under a single key, so the
//! client only needs GET and SET. The [`KvStore`] trait exists so tests can
//! substitute an in-memory fake for the HTTP-backed implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Minimal key-value store interface over string values.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetches the raw string stored under `key`, or `None` if absent.
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any prior value.
    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;
}

/// Upstash REST API response for a GET: `{"result": "..."}` or `{"result": null}`.
#[derive(Debug, Deserialize)]
struct KvGetResponse {
    result: Option<String>,
}

/// KV client backed by the Upstash REST API.
///
/// Credentials are optional at construction so the service can boot without
/// them; every call fails with a descriptive error when they are missing.
#[derive(Clone)]
pub struct UpstashKv {
    /// HTTP client for API requests.
    client: reqwest::Client,

    /// Base URL and bearer token, if configured.
    credentials: Option<(String, String)>,
}

impl UpstashKv {
    /// Creates a new KV client from the optional URL and token.
    ///
    /// Trailing slashes on the URL are trimmed so request paths are stable.
    pub fn new(url: Option<String>, token: Option<String>) -> Self {
        let credentials = match (url, token) {
            (Some(u), Some(t)) => Some((u.trim_end_matches('/').to_string(), t)),
            _ => None,
        };

        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            credentials,
        }
    }

    /// Returns true when both URL and token are configured.
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn require_credentials(&self) -> Result<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, t)| (u.as_str(), t.as_str()))
            .context("Missing KV_REST_API_URL or KV_REST_API_TOKEN")
    }
}

#[async_trait]
impl KvStore for UpstashKv {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let (base, token) = self.require_credentials()?;

        let url = format!("{}/get/{}", base, key);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to reach KV store")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("KV GET returned status {}: {}", status, body);
        }

        let parsed: KvGetResponse = response
            .json()
            .await
            .context("Failed to parse KV GET response")?;

        debug!("KV GET {} -> {} bytes", key, parsed.result.as_deref().map_or(0, str::len));
        Ok(parsed.result)
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let (base, token) = self.require_credentials()?;

        // The REST API stores the request body verbatim as the value, so the
        // value goes on the wire raw, not wrapped in JSON.
        let url = format!("{}/set/{}", base, key);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .body(value.to_string())
            .send()
            .await
            .context("Failed to reach KV store")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("KV SET returned status {}: {}", status, body);
        }

        debug!("KV SET {} <- {} bytes", key, value.len());
        Ok(())
    }
}
