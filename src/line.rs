//! LINE messaging platform integration.
//!
//! Covers the three things the bot needs from LINE: webhook signature
//! verification (HMAC-SHA256 over the raw body, base64-compared against the
//! `x-line-signature` header), the webhook event wire types, and the reply
//! client for the single-use reply tokens.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// LINE reply endpoint.
const LINE_REPLY_URL: &str = "https://api.line.me/v2/bot/message/reply";

/// LINE caps text messages at 5000 characters; stay under with headroom.
const MAX_REPLY_CHARS: usize = 4900;

/// Verifies a webhook signature against the raw request body.
///
/// The comparison runs in constant time via `Mac::verify_slice`. Returns
/// false for a malformed (non-base64) signature header.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// The webhook delivery body: `{"events": [...]}`.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

/// One webhook event. Only `message` events with a text message and a reply
/// token are of interest; the rest are skipped by the pipeline.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub reply_token: Option<String>,

    #[serde(default)]
    pub message: Option<EventMessage>,

    #[serde(default)]
    pub source: Option<EventSource>,
}

impl WebhookEvent {
    /// The conversation this event belongs to: group ID, room ID, or none
    /// for a one-on-one chat.
    pub fn conversation_id(&self) -> Option<&str> {
        let source = self.source.as_ref()?;
        source.group_id.as_deref().or(source.room_id.as_deref())
    }
}

/// The message attached to a `message` event.
#[derive(Debug, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default)]
    pub text: Option<String>,
}

/// Where the event came from.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(default)]
    pub room_id: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,
}

/// Request body for the reply endpoint.
#[derive(Serialize)]
struct ReplyRequest<'a> {
    #[serde(rename = "replyToken")]
    reply_token: &'a str,
    messages: Vec<ReplyMessage<'a>>,
}

#[derive(Serialize)]
struct ReplyMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    text: &'a str,
}

/// Outbound reply seam, faked in webhook tests.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Sends one text reply for the event that issued `reply_token`.
    /// Reply tokens are single-use; never reuse one across events.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()>;
}

/// Reply client for the LINE messaging API.
#[derive(Clone)]
pub struct LineClient {
    /// HTTP client for API requests.
    client: reqwest::Client,

    /// Channel access token, if configured.
    access_token: Option<String>,
}

impl LineClient {
    /// Creates a new reply client. The token stays optional; `reply` fails
    /// with a descriptive error when it is missing.
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            access_token,
        }
    }
}

#[async_trait]
impl ReplySink for LineClient {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        let access_token = self
            .access_token
            .as_deref()
            .context("Missing LINE_CHANNEL_ACCESS_TOKEN")?;

        let truncated = truncate_chars(text, MAX_REPLY_CHARS);
        let request = ReplyRequest {
            reply_token,
            messages: vec![ReplyMessage {
                message_type: "text",
                text: truncated,
            }],
        };

        let response = self
            .client
            .post(LINE_REPLY_URL)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to LINE reply API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE reply failed {}: {}", status, body);
        }

        debug!("Replied ({} chars)", truncated.chars().count());
        Ok(())
    }
}

/// Truncates to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
