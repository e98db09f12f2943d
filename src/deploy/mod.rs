use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

pub mod github;

/// Where a project gets published, and with whose credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub owner: String,
    pub repo: String,
    pub token: String,
}

/// Outcome of pushing a project tree. Individual upload failures don't
/// abort the push; they are listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryPush {
    pub repo_url: String,
    pub uploaded: Vec<String>,
    pub failed_uploads: Vec<String>,
}

impl RepositoryPush {
    pub fn complete(&self) -> bool {
        self.failed_uploads.is_empty()
    }
}

/// Static hosting backend. The pipeline calls `create_or_update_repository`
/// then `publish_static_site`, and treats any error as a non-fatal status.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Make sure the repository exists, empty it, and upload every file under
    /// `local_path` at the same relative path.
    async fn create_or_update_repository(&self, target: &DeployTarget, local_path: &Path) -> Result<RepositoryPush>;

    /// Turn on static hosting for the repository and return the public URL.
    async fn publish_static_site(&self, target: &DeployTarget, local_path: &Path) -> Result<String>;
}

pub fn make_deployer(cfg: &Config) -> Result<Box<dyn Deployer>> {
    Ok(Box::new(github::GitHubPages::new(
        &cfg.github_api_base,
        &cfg.github_branch,
        Duration::from_secs(cfg.timeout_secs),
    )?))
}
