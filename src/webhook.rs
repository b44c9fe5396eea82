//! Per-event webhook pipeline.
//!
//! Each event in a delivery is filtered, detected, translated and replied to
//! independently; one event's failure never aborts the rest of the batch,
//! and the chat never sees error text. Every event resolves to an explicit
//! [`EventOutcome`] so the batch result stays inspectable in logs and tests.

use crate::lang::{self, Direction, Lang};
use crate::line::{ReplySink, WebhookEvent};
use crate::prompt::PromptStyle;
use crate::translator::Translate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flag prefix on replies translated into Chinese.
pub const REPLY_FLAG_ZH: &str = "🇹🇼 ";

/// Flag prefix on replies translated into Vietnamese.
pub const REPLY_FLAG_VI: &str = "🇻🇳 ";

/// Why an event produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a `message` event.
    NotMessage,
    /// Message event without a reply token.
    NoReplyToken,
    /// Message is not a text message.
    NotText,
    /// Text is empty after trimming.
    EmptyText,
    /// Text contains a URL; links and ads are never translated.
    Url,
    /// Text starts with one of the bot's own reply flag prefixes.
    OwnReply,
    /// Neither supported language detected.
    NoLanguage,
    /// Translator returned an empty string.
    EmptyOutput,
    /// Translation is identical to the input; replying would be noise.
    UnchangedOutput,
}

/// Result of processing one webhook event.
#[derive(Debug)]
pub enum EventOutcome {
    /// A reply was sent.
    Replied,
    /// The event was filtered out; no reply, no error.
    Skipped(SkipReason),
    /// Translation or reply failed; swallowed so the batch continues.
    Failed(String),
}

/// The webhook processing pipeline with its injected collaborators.
#[derive(Clone)]
pub struct WebhookPipeline {
    translator: Arc<dyn Translate>,
    reply_sink: Arc<dyn ReplySink>,
    family_group_ids: HashSet<String>,
}

impl WebhookPipeline {
    pub fn new(
        translator: Arc<dyn Translate>,
        reply_sink: Arc<dyn ReplySink>,
        family_group_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            translator,
            reply_sink,
            family_group_ids: family_group_ids.into_iter().collect(),
        }
    }

    /// Processes all events of one delivery sequentially, in delivery order.
    pub async fn process_delivery(&self, events: &[WebhookEvent]) -> Vec<EventOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.process_event(event).await);
        }

        let replied = outcomes
            .iter()
            .filter(|o| matches!(o, EventOutcome::Replied))
            .count();
        info!(
            "Webhook delivery processed: {} events, {} replied",
            events.len(),
            replied
        );
        outcomes
    }

    async fn process_event(&self, event: &WebhookEvent) -> EventOutcome {
        if event.event_type != "message" {
            return EventOutcome::Skipped(SkipReason::NotMessage);
        }
        let Some(reply_token) = event.reply_token.as_deref() else {
            return EventOutcome::Skipped(SkipReason::NoReplyToken);
        };
        let text = match &event.message {
            Some(msg) if msg.message_type == "text" => msg.text.as_deref().unwrap_or(""),
            _ => return EventOutcome::Skipped(SkipReason::NotText),
        };

        let text = text.trim();
        if text.is_empty() {
            return EventOutcome::Skipped(SkipReason::EmptyText);
        }
        if is_own_reply(text) {
            return EventOutcome::Skipped(SkipReason::OwnReply);
        }
        if lang::contains_url(text) {
            debug!("Skipping URL message");
            return EventOutcome::Skipped(SkipReason::Url);
        }

        let Some(detected) = lang::detect(text) else {
            return EventOutcome::Skipped(SkipReason::NoLanguage);
        };
        let direction = Direction::from_source(detected);
        let style = self.prompt_style(event);

        let output = match self.translator.translate(text, direction, style).await {
            Ok(out) => out,
            Err(e) => {
                // Stay silent in the chat; the batch keeps going.
                warn!("Translation failed ({}): {:#}", direction, e);
                return EventOutcome::Failed(e.to_string());
            }
        };

        let output = output.trim();
        if output.is_empty() {
            return EventOutcome::Skipped(SkipReason::EmptyOutput);
        }
        if output == text {
            return EventOutcome::Skipped(SkipReason::UnchangedOutput);
        }

        let decorated = decorate_reply(direction.to, output);
        match self.reply_sink.reply(reply_token, &decorated).await {
            Ok(()) => EventOutcome::Replied,
            Err(e) => {
                warn!("Reply failed: {:#}", e);
                EventOutcome::Failed(e.to_string())
            }
        }
    }

    /// Family register for allow-listed groups/rooms, generic otherwise.
    fn prompt_style(&self, event: &WebhookEvent) -> PromptStyle {
        match event.conversation_id() {
            Some(id) if self.family_group_ids.contains(id) => PromptStyle::Family,
            _ => PromptStyle::Generic,
        }
    }
}

/// True when the text starts with one of the bot's own reply decorations.
fn is_own_reply(text: &str) -> bool {
    text.starts_with(REPLY_FLAG_ZH.trim_end()) || text.starts_with(REPLY_FLAG_VI.trim_end())
}

/// Prefixes the reply with the target language's flag.
fn decorate_reply(to: Lang, text: &str) -> String {
    let flag = match to {
        Lang::Zh => REPLY_FLAG_ZH,
        Lang::Vi => REPLY_FLAG_VI,
    };
    format!("{}{}", flag, text)
}
