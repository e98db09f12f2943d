use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fs_err as fs;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::{guess_mime, require_key, Generator};
use crate::errors::SiteGenError;
use crate::wire::{ContentPart, FileSource, GenerationCall, GenerationReply, UploadedFile};

/// Google Gemini over the `generateContent` REST surface. Images go through
/// the Files API and are referenced by URI. The key goes in the
/// `x-goog-api-key` header and must never appear in a request URL.
pub struct Gemini {
    model: String,
    api_key: Option<String>,
    api_base: String,
    client: Client,
}

impl Gemini {
    pub fn new(model: String, api_key: Option<String>, api_base: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model, api_key, api_base, client })
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("GOOGLE_API_KEY env var is not set"))
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    File { file_data: FileData<'a> },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

fn to_parts(parts: &[ContentPart]) -> Vec<Part<'_>> {
    parts
        .iter()
        .map(|p| match p {
            ContentPart::Text(text) => Part::Text { text },
            ContentPart::File(UploadedFile { mime_type, source: FileSource::Remote { uri } }) => Part::File {
                file_data: FileData { mime_type, file_uri: uri },
            },
            ContentPart::File(UploadedFile { mime_type, source: FileSource::Inline { data } }) => Part::Inline {
                inline_data: InlineData { mime_type, data },
            },
        })
        .collect()
}

#[async_trait]
impl Generator for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    fn ensure_configured(&self) -> Result<(), SiteGenError> {
        require_key(&self.api_key, "GOOGLE_API_KEY")
    }

    async fn upload(&self, path: &Path) -> Result<UploadedFile> {
        let key = self.key()?;
        let bytes = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
        let mime = guess_mime(path);
        let url = format!("{}/upload/v1beta/files", self.api_base.trim_end_matches('/'));

        debug!(path = %path.display(), bytes = bytes.len(), "gemini: uploading file");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await
            .context("gemini upload failed")?;

        let status = resp.status();
        let text = resp.text().await.context("gemini read upload body failed")?;
        if !status.is_success() {
            return Err(anyhow!("Gemini upload error ({}): {}", status, text));
        }
        let parsed: UploadResponse =
            serde_json::from_str(&text).map_err(|e| anyhow!("gemini upload parse error: {}\nRaw: {}", e, text))?;

        Ok(UploadedFile {
            mime_type: parsed.file.mime_type.unwrap_or_else(|| mime.to_string()),
            source: FileSource::Remote { uri: parsed.file.uri },
        })
    }

    async fn generate(&self, call: &GenerationCall) -> Result<GenerationReply> {
        let key = self.key()?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        );
        let body = GenerateRequest {
            system_instruction: SystemInstruction { parts: vec![Part::Text { text: &call.system_instruction }] },
            contents: vec![Content { role: "user", parts: to_parts(&call.parts) }],
        };

        debug!(model = %self.model, parts = call.parts.len(), "gemini: POST generateContent");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .context("gemini request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("gemini read body failed")?;
        if !status.is_success() {
            return Err(anyhow!("Gemini API error ({}): {}", status, text));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| anyhow!("gemini response parse error: {}\nRaw: {}", e, text))?;

        let content: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if content.is_empty() {
            warn!("gemini: empty candidate text");
        }
        Ok(GenerationReply { text: content })
    }
}
