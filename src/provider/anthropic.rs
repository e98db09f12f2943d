use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{require_key, Generator};
use crate::errors::SiteGenError;
use crate::wire::{ContentPart, FileSource, GenerationCall, GenerationReply};

pub struct Anthropic {
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub api_version: String,
    pub max_tokens: u32,
    client: Client,
}

impl Anthropic {
    pub fn new(model: String, api_key: Option<String>, timeout: Duration, max_tokens: u32) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            model,
            api_key,
            api_base: "https://api.anthropic.com".into(),
            api_version: "2023-06-01".into(),
            max_tokens,
            client,
        })
    }
}

#[derive(Serialize)]
struct MsgRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Msg<'a>>,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: Vec<Block<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Block<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    r#type: &'a str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct MsgResponse {
    content: Vec<OutBlock>,
}

#[derive(Deserialize)]
struct OutBlock {
    #[serde(default)]
    text: String,
    #[serde(default)]
    r#type: String,
}

fn to_blocks(parts: &[ContentPart]) -> Vec<Block<'_>> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text(text) => Some(Block::Text { text }),
            ContentPart::File(f) => match &f.source {
                FileSource::Inline { data } => Some(Block::Image {
                    source: ImageSource { r#type: "base64", media_type: &f.mime_type, data },
                }),
                FileSource::Remote { uri } => {
                    warn!(%uri, "anthropic: remote file references are not supported, skipping part");
                    None
                }
            },
        })
        .collect()
}

#[async_trait]
impl Generator for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn ensure_configured(&self) -> Result<(), SiteGenError> {
        require_key(&self.api_key, "ANTHROPIC_API_KEY")
    }

    async fn generate(&self, call: &GenerationCall) -> Result<GenerationReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY env var is not set"))?;
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));
        let body = MsgRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &call.system_instruction,
            messages: vec![Msg { role: "user", content: to_blocks(&call.parts) }],
        };

        debug!(%url, "anthropic: POST");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("anthropic read body failed")?;
        if !status.is_success() {
            return Err(anyhow!("Anthropic API error ({}): {}", status, text));
        }

        let parsed: MsgResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("anthropic response parse error: {}", e))?;

        let content: String = parsed
            .content
            .into_iter()
            .filter(|b| b.r#type == "text")
            .map(|b| b.text)
            .collect();

        if content.is_empty() {
            return Err(anyhow!("anthropic: empty content"));
        }
        Ok(GenerationReply { text: content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::UploadedFile;
    use serde_json::json;

    #[test]
    fn image_block_precedes_text() {
        let parts = vec![
            ContentPart::File(UploadedFile { mime_type: "image/jpeg".into(), source: FileSource::Inline { data: "AAAA".into() } }),
            ContentPart::Text("recreate this".into()),
        ];
        let v = serde_json::to_value(to_blocks(&parts)).unwrap();
        assert_eq!(
            v,
            json!([
                { "type": "image", "source": { "type": "base64", "media_type": "image/jpeg", "data": "AAAA" } },
                { "type": "text", "text": "recreate this" }
            ])
        );
    }
}
