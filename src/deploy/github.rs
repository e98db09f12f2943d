use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use fs_err as fs;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{DeployTarget, Deployer, RepositoryPush};

const USER_AGENT: &str = concat!("vibe_sitegen/", env!("CARGO_PKG_VERSION"));

pub fn pages_url(owner: &str, repo: &str) -> String {
    format!("https://{owner}.github.io/{repo}/")
}

/// GitHub repository + Pages publishing over the v3 REST API.
pub struct GitHubPages {
    api_base: String,
    branch: String,
    client: Client,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Many(Vec<ContentItem>),
    One(ContentItem),
}

#[derive(Deserialize)]
struct ContentItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sha: String,
}

impl GitHubPages {
    pub fn new(api_base: &str, branch: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            branch: branch.to_string(),
            client,
        })
    }

    fn authed(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.header("Authorization", format!("token {token}"))
            .header("Accept", "application/vnd.github.v3+json")
    }

    fn contents_url(&self, t: &DeployTarget, path: &str) -> String {
        if path.is_empty() {
            format!("{}/repos/{}/{}/contents", self.api_base, t.owner, t.repo)
        } else {
            format!("{}/repos/{}/{}/contents/{}", self.api_base, t.owner, t.repo, path)
        }
    }

    async fn ensure_repository(&self, t: &DeployTarget) -> Result<()> {
        let url = format!("{}/repos/{}/{}", self.api_base, t.owner, t.repo);
        let resp = self.authed(self.client.get(&url), &t.token).send().await?;
        match resp.status() {
            s if s.is_success() => {
                debug!(repo = %t.repo, "repository already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let create = format!("{}/user/repos", self.api_base);
                let body = json!({ "name": t.repo, "private": false, "auto_init": true });
                let resp = self.authed(self.client.post(&create), &t.token).json(&body).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    bail!("creating repository {}: {} {}", t.repo, status, text);
                }
                info!(owner = %t.owner, repo = %t.repo, "created repository");
                Ok(())
            }
            status => {
                let text = resp.text().await.unwrap_or_default();
                bail!("checking repository {}: {} {}", t.repo, status, text)
            }
        }
    }

    /// Remove every file in the repository, walking directories with an
    /// explicit stack.
    async fn clear_contents(&self, t: &DeployTarget) -> Result<usize> {
        let mut pending = vec![String::new()];
        let mut deleted = 0;
        while let Some(dir) = pending.pop() {
            let resp = self
                .authed(self.client.get(self.contents_url(t, &dir)), &t.token)
                .query(&[("ref", self.branch.as_str())])
                .send()
                .await?;
            if resp.status() == StatusCode::NOT_FOUND && dir.is_empty() {
                // Empty repository.
                return Ok(0);
            }
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("listing {:?}: {} {}", dir, status, text);
            }
            let items = match resp.json::<Listing>().await.context("decoding contents listing")? {
                Listing::Many(v) => v,
                Listing::One(item) => vec![item],
            };
            for item in items {
                if item.kind == "dir" {
                    pending.push(item.path);
                    continue;
                }
                let body = json!({
                    "message": format!("Delete {}", item.path),
                    "sha": item.sha,
                    "branch": self.branch,
                });
                let resp = self
                    .authed(self.client.delete(self.contents_url(t, &item.path)), &t.token)
                    .json(&body)
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    bail!("deleting {}: {} {}", item.path, status, text);
                }
                debug!(path = %item.path, "deleted remote file");
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn upload_file(&self, t: &DeployTarget, local: &Path, repo_path: &str) -> Result<()> {
        let bytes = fs::read(local)?;
        let body = json!({
            "message": format!("Upload {repo_path}"),
            "content": BASE64.encode(bytes),
            "branch": self.branch,
        });
        let resp = self
            .authed(self.client.put(self.contents_url(t, repo_path)), &t.token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{} {}", status, text));
        }
        Ok(())
    }
}

/// Forward-slash path of `path` relative to the project root.
fn repo_path_of(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl Deployer for GitHubPages {
    async fn create_or_update_repository(&self, t: &DeployTarget, local_path: &Path) -> Result<RepositoryPush> {
        if !local_path.is_dir() {
            bail!("project directory {} does not exist", local_path.display());
        }
        self.ensure_repository(t).await?;
        let deleted = self.clear_contents(t).await?;
        info!(repo = %t.repo, deleted, "repository cleaned and ready for upload");

        let mut push = RepositoryPush {
            repo_url: format!("https://github.com/{}/{}", t.owner, t.repo),
            ..RepositoryPush::default()
        };
        for entry in WalkDir::new(local_path).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map_or_else(|| local_path.display().to_string(), |p| repo_path_of(local_path, p));
                    warn!(path = %path, error = %e, "unreadable entry, not uploaded");
                    push.failed_uploads.push(path);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let repo_path = repo_path_of(local_path, entry.path());
            if !entry.file_type().is_file() {
                warn!(path = %repo_path, "not a regular file, not uploaded");
                push.failed_uploads.push(repo_path);
                continue;
            }
            match self.upload_file(t, entry.path(), &repo_path).await {
                Ok(()) => {
                    info!(path = %repo_path, "uploaded");
                    push.uploaded.push(repo_path);
                }
                Err(e) => {
                    warn!(path = %repo_path, error = %format!("{e:#}"), "upload failed");
                    push.failed_uploads.push(repo_path);
                }
            }
        }
        Ok(push)
    }

    async fn publish_static_site(&self, t: &DeployTarget, _local_path: &Path) -> Result<String> {
        let url = format!("{}/repos/{}/{}/pages", self.api_base, t.owner, t.repo);
        let body = json!({ "source": { "branch": self.branch, "path": "/" } });
        let resp = self.authed(self.client.post(&url), &t.token).json(&body).send().await?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::CONFLICT => {
                let site = pages_url(&t.owner, &t.repo);
                info!(url = %site, "pages enabled");
                Ok(site)
            }
            status => {
                let text = resp.text().await.unwrap_or_default();
                bail!("enabling pages: {} {}", status, text)
            }
        }
    }
}
