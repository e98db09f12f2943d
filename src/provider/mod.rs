use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use fs_err as fs;
use std::path::Path;
use std::time::Duration;

use crate::cli::ProviderKind;
use crate::config::{env_secret, Config};
use crate::errors::SiteGenError;
use crate::wire::{FileSource, GenerationCall, GenerationReply, UploadedFile};

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

/// One text-generation backend. Every call is independent; the pipeline
/// sequences them.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Fails before any network traffic when credentials are missing.
    fn ensure_configured(&self) -> Result<(), SiteGenError>;

    /// Make a local image available to `generate` as a content part.
    async fn upload(&self, path: &Path) -> Result<UploadedFile> {
        inline_file(path)
    }

    async fn generate(&self, call: &GenerationCall) -> Result<GenerationReply>;
}

pub type DynGenerator = Box<dyn Generator>;

pub fn make_generator(cfg: &Config) -> Result<DynGenerator> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let model = cfg.model.clone();
    Ok(match cfg.provider {
        ProviderKind::Gemini => Box::new(gemini::Gemini::new(
            model,
            env_secret("GOOGLE_API_KEY"),
            cfg.gemini_api_base.clone(),
            timeout,
        )?),
        ProviderKind::OpenAI => Box::new(openai::OpenAIProvider::new(model, env_secret("OPENAI_API_KEY"), timeout)?),
        ProviderKind::Anthropic => Box::new(anthropic::Anthropic::new(
            model,
            env_secret("ANTHROPIC_API_KEY"),
            timeout,
            cfg.max_output_tokens,
        )?),
        ProviderKind::Ollama => Box::new(ollama::Ollama::new(model, cfg.ollama_url.clone(), timeout)?),
    })
}

pub(crate) fn require_key(key: &Option<String>, var: &str) -> Result<(), SiteGenError> {
    match key {
        Some(_) => Ok(()),
        None => Err(SiteGenError::Configuration(format!("{var} env var is not set"))),
    }
}

/// Read an image and carry it inline, base64-encoded.
pub fn inline_file(path: &Path) -> Result<UploadedFile> {
    let data = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(UploadedFile {
        mime_type: guess_mime(path).to_string(),
        source: FileSource::Inline { data: BASE64.encode(data) },
    })
}

pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_mime(Path::new("shot.PNG")), "image/png");
        assert_eq!(guess_mime(Path::new("a/b/photo.jpeg")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn inline_file_base64_encodes() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.png");
        fs::write(&p, b"abc").unwrap();
        let up = inline_file(&p).unwrap();
        assert_eq!(up.mime_type, "image/png");
        match up.source {
            FileSource::Inline { data } => assert_eq!(data, "YWJj"),
            FileSource::Remote { .. } => panic!("expected inline"),
        }
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = require_key(&None, "OPENAI_API_KEY").unwrap_err();
        assert!(matches!(err, SiteGenError::Configuration(_)));
        assert!(require_key(&Some("k".into()), "OPENAI_API_KEY").is_ok());
    }
}
