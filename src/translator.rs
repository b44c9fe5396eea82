//! Translation client backed by the OpenAI Responses API.
//!
//! One synchronous request per translation: the glossary-biased system
//! prompt, the user text as the only other message, temperature pinned to 0
//! and a small output cap. No retries, no streaming; failures surface as
//! errors for the caller to handle per-event.

use crate::glossary::GlossaryStore;
use crate::lang::Direction;
use crate::prompt::{build_system_prompt, PromptStyle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// OpenAI Responses API endpoint.
const OPENAI_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// Output-length cap for translation responses.
const MAX_OUTPUT_TOKENS: u32 = 300;

/// Vietnamese spellings of the national health insurance card. When the
/// input mentions any of these, the output is checked for known
/// mistranslations of the term.
const NHI_CARD_INPUT_VARIANTS: &[&str] = &[
    "thẻ bảo hiểm y tế",
    "the bao hiem y te",
    "thẻ bảo hiểm",
    "bảo hiểm y tế",
    "thẻ y tế",
];

/// Mistranslations of the NHI card the model keeps producing, longest first
/// so substring replacement never clobbers a longer match.
const NHI_CARD_MISTRANSLATIONS: &[&str] =
    &["醫療保險卡", "健康保險卡", "醫保卡", "醫療卡", "保險卡"];

/// The agreed term for the NHI card.
const NHI_CARD_TERM: &str = "健保卡";

/// Translation seam. Lets webhook tests substitute a fake for the OpenAI
/// client.
#[async_trait]
pub trait Translate: Send + Sync {
    /// Translates `text` along `direction`, returning the cleaned output
    /// (possibly empty when the model judges the input untranslatable).
    async fn translate(
        &self,
        text: &str,
        direction: Direction,
        style: PromptStyle,
    ) -> Result<String>;
}

/// Translation service that loads the glossary, builds the system prompt and
/// calls the OpenAI completion endpoint.
#[derive(Clone)]
pub struct Translator {
    /// HTTP client for API requests.
    client: reqwest::Client,

    /// OpenAI API key, if configured.
    api_key: Option<String>,

    /// Model name sent with every request.
    model: String,

    /// Glossary source for prompt injection.
    glossary: GlossaryStore,
}

impl Translator {
    /// Creates a new translator.
    ///
    /// The API key stays optional here; `translate` fails with a descriptive
    /// error when it is missing.
    pub fn new(api_key: Option<String>, model: &str, glossary: GlossaryStore) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            api_key,
            model: model.to_string(),
            glossary,
        }
    }
}

#[async_trait]
impl Translate for Translator {
    async fn translate(
        &self,
        text: &str,
        direction: Direction,
        style: PromptStyle,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .context("Missing OPENAI_API_KEY")?;

        let entries = self.glossary.load().await?;
        let system = build_system_prompt(direction, &entries, style);

        let body = json!({
            "model": self.model,
            "input": [
                { "role": "system", "content": system },
                { "role": "user", "content": text },
            ],
            "temperature": 0,
            "max_output_tokens": MAX_OUTPUT_TOKENS,
        });

        let response = self
            .client
            .post(OPENAI_RESPONSES_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("OpenAI API error: {} - {}", status, body);
            anyhow::bail!("OpenAI returned status {}: {}", status, body);
        }

        let data: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let out = extract_output_text(&data).trim().to_string();
        debug!("Translated ({}): '{}' -> '{}'", direction, text, out);

        Ok(fix_known_terms(text, out))
    }
}

/// Extracts plain output text from a Responses API payload.
///
/// Prefers the flattened `output_text` field; falls back to concatenating
/// the `output[].content[]` text parts.
fn extract_output_text(data: &Value) -> String {
    if let Some(text) = data.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }

    let mut out = String::new();
    if let Some(items) = data.get("output").and_then(Value::as_array) {
        for item in items {
            let Some(parts) = item.get("content").and_then(Value::as_array) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("output_text") {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        out.push_str(text);
                    }
                }
            }
        }
    }
    out
}

/// Rewrites the one known recurring mistranslation: the NHI card ends up as
/// a generic "insurance card" phrasing. Applied only when the input actually
/// mentions the term, by literal substring replacement on the output.
fn fix_known_terms(input: &str, mut output: String) -> String {
    let input_lower = input.to_lowercase();
    let mentioned = NHI_CARD_INPUT_VARIANTS
        .iter()
        .any(|v| input_lower.contains(v));
    if !mentioned {
        return output;
    }

    for wrong in NHI_CARD_MISTRANSLATIONS {
        if output.contains(wrong) {
            output = output.replace(wrong, NHI_CARD_TERM);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_flattened_output_text() {
        let data = json!({ "output_text": " ngủ ngon nha " });
        assert_eq!(extract_output_text(&data), " ngủ ngon nha ");
    }

    #[test]
    fn extracts_nested_output_parts() {
        let data = json!({
            "output": [{
                "type": "message",
                "content": [
                    { "type": "output_text", "text": "ngủ " },
                    { "type": "output_text", "text": "ngon" },
                ],
            }],
        });
        assert_eq!(extract_output_text(&data), "ngủ ngon");
    }

    #[test]
    fn missing_output_yields_empty() {
        assert_eq!(extract_output_text(&json!({})), "");
    }

    #[test]
    fn nhi_card_fixup_applies_when_input_mentions_it() {
        let out = fix_known_terms(
            "mẹ nhớ mang thẻ bảo hiểm y tế nha",
            "媽媽記得帶醫療保險卡喔".to_string(),
        );
        assert_eq!(out, "媽媽記得帶健保卡喔");
    }

    #[test]
    fn nhi_card_fixup_handles_unaccented_variant() {
        let out = fix_known_terms("dem theo the bao hiem y te", "帶醫保卡".to_string());
        assert_eq!(out, "帶健保卡");
    }

    #[test]
    fn nhi_card_fixup_skipped_when_input_unrelated() {
        let out = fix_known_terms("ăn cơm chưa", "吃飯了嗎，保險卡".to_string());
        assert_eq!(out, "吃飯了嗎，保險卡");
    }
}
