use async_trait::async_trait;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{require_key, Generator};
use crate::errors::SiteGenError;
use crate::wire::{ContentPart, FileSource, GenerationCall, GenerationReply};

/// OpenAI chat completions. The system instruction goes in its own message;
/// images travel inline as data URLs.
pub struct OpenAIProvider {
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(model: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model, api_key, client })
    }
}

fn user_content(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text(text) => Some(json!({ "type": "text", "text": text })),
            ContentPart::File(f) => match &f.source {
                FileSource::Inline { data } => Some(json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{};base64,{}", f.mime_type, data) }
                })),
                FileSource::Remote { uri } => {
                    warn!(%uri, "openai: remote file references are not supported, skipping part");
                    None
                }
            },
        })
        .collect()
}

#[async_trait]
impl Generator for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn ensure_configured(&self) -> Result<(), SiteGenError> {
        require_key(&self.api_key, "OPENAI_API_KEY")
    }

    async fn generate(&self, call: &GenerationCall) -> Result<GenerationReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY env var is not set"))?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": call.system_instruction },
                { "role": "user", "content": user_content(&call.parts) }
            ],
            "temperature": 0.2,
            // Ask for a JSON object; the extractor still copes when this is ignored.
            "response_format": { "type": "json_object" }
        });

        debug!(model = %self.model, "openai: POST /v1/chat/completions");

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("openai request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("openai read body failed")?;

        if !status.is_success() {
            return Err(anyhow!("OpenAI API error ({}): {}", status, text));
        }

        // Minimal structs to parse the chat response
        #[derive(Deserialize)]
        struct ChatMessage {
            #[serde(default)]
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessage,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse OpenAI response: {e}\nRaw: {text}"))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(GenerationReply { text: content })
    }
}
