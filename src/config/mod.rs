use anyhow::{bail, Context, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::{Args, ProviderKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub projects_root: String,
    pub uploads_dir: String,
    pub provider: ProviderKind,
    pub model: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
    pub gemini_api_base: String,
    pub ollama_url: String,
    pub github_api_base: String,
    pub github_branch: String,
    pub figma_api_base: String,
    pub bind: String,
    pub save_responses: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            projects_root: "projects".into(),
            uploads_dir: "uploads".into(),
            provider: ProviderKind::Gemini,
            model: "gemini-2.0-flash".into(),
            timeout_secs: 600,
            max_output_tokens: 8192,
            gemini_api_base: "https://generativelanguage.googleapis.com".into(),
            ollama_url: "http://localhost:11434".into(),
            github_api_base: "https://api.github.com".into(),
            github_branch: "main".into(),
            figma_api_base: "https://api.figma.com".into(),
            bind: "0.0.0.0:5500".into(),
            save_responses: false,
        }
    }
}

impl Config {
    /// Defaults, overlaid with a `.toml` / `.yaml` file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match ext.to_ascii_lowercase().as_str() {
            "toml" => toml::from_str(&text).with_context(|| format!("parsing {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display())),
            other => bail!("unsupported config format '{}' for {}", other, path.display()),
        }
    }

    /// CLI flags win over the file; `PORT` wins over the configured bind port.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(p) = args.provider {
            if p != self.provider && args.model.is_none() {
                self.model = default_model(p).into();
            }
            self.provider = p;
        }
        if let Some(m) = &args.model {
            self.model = m.clone();
        }
        if let Some(root) = &args.projects_root {
            self.projects_root = root.clone();
        }
        if let Some(t) = args.timeout_secs {
            self.timeout_secs = t;
        }
        if args.save_responses {
            self.save_responses = true;
        }
        if let Ok(port) = std::env::var("PORT") {
            self.bind = rebind_port(&self.bind, &port);
        }
    }

    pub fn projects_root(&self) -> PathBuf {
        PathBuf::from(&self.projects_root)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(&self.uploads_dir)
    }
}

pub fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Gemini => "gemini-2.0-flash",
        ProviderKind::OpenAI => "gpt-4.1-mini",
        ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
        ProviderKind::Ollama => "llama3.1",
    }
}

/// Non-empty environment value, trimmed.
pub fn env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn rebind_port(bind: &str, port: &str) -> String {
    let host = bind.rsplit_once(':').map(|(h, _)| h).unwrap_or(bind);
    format!("{}:{}", host, port.trim())
}
