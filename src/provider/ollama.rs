use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::Generator;
use crate::errors::SiteGenError;
use crate::wire::{ContentPart, FileSource, GenerationCall, GenerationReply};

/// Local Ollama server. Needs no credentials.
pub struct Ollama {
    pub model: String,
    pub url: String,
    client: Client,
}

impl Ollama {
    pub fn new(model: String, url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model, url, client })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg>,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct Msg {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: MsgOut,
}

#[derive(Deserialize)]
struct MsgOut {
    content: String,
}

fn to_messages(call: &GenerationCall) -> Vec<Msg> {
    let mut text = Vec::new();
    let mut images = Vec::new();
    for part in &call.parts {
        match part {
            ContentPart::Text(t) => text.push(t.as_str()),
            ContentPart::File(f) => match &f.source {
                FileSource::Inline { data } => images.push(data.clone()),
                FileSource::Remote { uri } => warn!(%uri, "ollama: remote file references are not supported, skipping part"),
            },
        }
    }
    vec![
        Msg { role: "system".into(), content: call.system_instruction.clone(), images: Vec::new() },
        Msg { role: "user".into(), content: text.join("\n\n"), images },
    ]
}

#[async_trait]
impl Generator for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    fn ensure_configured(&self) -> Result<(), SiteGenError> {
        if self.url.trim().is_empty() {
            return Err(SiteGenError::Configuration("ollama_url is empty".into()));
        }
        Ok(())
    }

    async fn generate(&self, call: &GenerationCall) -> Result<GenerationReply> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: to_messages(call),
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.1 },
        };

        debug!(%url, "ollama: POST");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("ollama request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("ollama read body failed")?;
        if !status.is_success() {
            return Err(anyhow!("Ollama error ({}): {}", status, text));
        }

        // Proxies sometimes hand back the bare model text; keep it as-is then.
        let content = match serde_json::from_str::<ChatResponse>(&text) {
            Ok(c) => c.message.content,
            Err(_) => text,
        };
        Ok(GenerationReply { text: content })
    }
}
