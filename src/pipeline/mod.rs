use chrono::Utc;
use fs_err as fs;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::amplify;
use crate::config::Config;
use crate::deploy::{DeployTarget, Deployer};
use crate::errors::SiteGenError;
use crate::fallback;
use crate::links;
use crate::log::StageLog;
use crate::materialize;
use crate::provider::Generator;
use crate::synth;
use crate::validate;
use crate::wire::{DeploymentStatus, FileBundle, GenerationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Amplifying,
    Synthesizing,
    Validating,
    Recovering,
    Materializing,
    Deploying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Amplifying => "amplifying",
            Stage::Synthesizing => "synthesizing",
            Stage::Validating => "validating",
            Stage::Recovering => "recovering",
            Stage::Materializing => "materializing",
            Stage::Deploying => "deploying",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Publishing details supplied with a request. Deployment only happens when
/// all three are present and non-blank.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub token: Option<String>,
    pub username: Option<String>,
    pub repo_name: Option<String>,
}

impl DeployRequest {
    pub fn target(&self) -> Option<DeployTarget> {
        let filled = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Some(DeployTarget {
            owner: filled(&self.username)?,
            repo: filled(&self.repo_name)?,
            token: filled(&self.token)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub project_name: Option<String>,
    pub image: Option<PathBuf>,
    /// `Some` when the caller asked for deployment.
    pub deploy: Option<DeployRequest>,
}

pub struct Pipeline {
    generator: Arc<dyn Generator>,
    deployer: Arc<dyn Deployer>,
    projects_root: PathBuf,
    save_responses: bool,
}

impl Pipeline {
    pub fn new(generator: Arc<dyn Generator>, deployer: Arc<dyn Deployer>, cfg: &Config) -> Self {
        Self {
            generator,
            deployer,
            projects_root: cfg.projects_root(),
            save_responses: cfg.save_responses,
        }
    }

    pub async fn run(&self, req: &GenerateRequest) -> GenerationResult {
        self.run_observed(req, &|_| {}).await
    }

    /// Run one generation end to end. Never returns an error: fatal
    /// categories become `success: false` with a message, everything else
    /// degrades.
    pub async fn run_observed(&self, req: &GenerateRequest, observe: &(dyn Fn(Stage) + Sync)) -> GenerationResult {
        let run_id = allocate_run_id(req.project_name.as_deref());
        let enter = |stage: Stage| {
            info!(run_id = %run_id, stage = %stage, "pipeline stage");
            observe(stage);
        };
        let fail = |e: SiteGenError| {
            error!(run_id = %run_id, error = %e, "run failed");
            observe(Stage::Failed);
            GenerationResult::failed(e.to_string())
        };

        if let Err(e) = self.generator.ensure_configured() {
            return fail(e);
        }
        let log = StageLog::new(&self.projects_root, &run_id, self.save_responses);
        info!(run_id = %run_id, provider = self.generator.name(), image = req.image.is_some(), "run started");

        enter(Stage::Amplifying);
        let requirements = match amplify::amplify(self.generator.as_ref(), &req.prompt, req.image.as_deref(), &log).await {
            Ok(r) => r,
            Err(e) => return fail(e),
        };

        enter(Stage::Synthesizing);
        let (reply_text, candidate) = match synth::synthesize(self.generator.as_ref(), &req.prompt, &requirements, &log).await {
            Ok(reply) => (reply.text, reply.bundle),
            Err(e) if e.is_fatal() => return fail(e),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "synthesis call failed, recovering");
                (e.to_string(), None)
            }
        };

        let mut bundle: Option<FileBundle> = None;
        if let Some(value) = candidate {
            enter(Stage::Validating);
            let check = validate::validate(&value);
            for w in &check.warnings {
                warn!(run_id = %run_id, warning = %w, "bundle validation");
            }
            if check.valid {
                bundle = validate::into_bundle(value);
            }
        }
        let bundle = match bundle {
            Some(b) => b,
            None => {
                enter(Stage::Recovering);
                warn!(run_id = %run_id, "using fallback project");
                fallback::fallback(&reply_text)
            }
        };

        enter(Stage::Materializing);
        let project_dir = match reserve_project_dir(&self.projects_root, &run_id, req.project_name.as_deref()) {
            Ok(dir) => dir,
            Err(e) => return fail(e),
        };
        let summary = match materialize::materialize(&bundle, &requirements, &project_dir) {
            Ok(s) => s,
            Err(e) => return fail(e),
        };

        let entry_html = summary.entry_html().unwrap_or(fallback::HTML_PATH).to_string();
        let mut files_created: Vec<String> = summary.details.iter().map(|d| d.rel_path.clone()).collect();
        if summary.doc_written {
            files_created.push(materialize::docs::DOC_FILE.to_string());
        }
        let mut result = GenerationResult {
            success: true,
            project_path: Some(project_dir.display().to_string()),
            generated_at: Utc::now(),
            files_written: summary.files_written(),
            preview_url: Some(links::preview_url(&project_dir, &entry_html)),
            download_url: Some(links::download_url(&project_dir)),
            requirements_record: Some(requirements),
            files_created,
            error: None,
            github_url: None,
            pages_url: None,
            deployment_status: None,
        };

        if let Some(deploy) = &req.deploy {
            match deploy.target() {
                None => {
                    info!(run_id = %run_id, "deployment requested without full credentials, skipping");
                    result.deployment_status = Some(DeploymentStatus::Skipped);
                }
                Some(target) => {
                    enter(Stage::Deploying);
                    self.deploy(&run_id, &target, &project_dir, &mut result).await;
                }
            }
        }

        enter(Stage::Done);
        result
    }

    /// Deployment writes only the optional result fields.
    async fn deploy(&self, run_id: &str, target: &DeployTarget, dir: &Path, result: &mut GenerationResult) {
        let push = match self.deployer.create_or_update_repository(target, dir).await {
            Ok(p) => p,
            Err(e) => {
                let e = SiteGenError::Deployment(format!("{e:#}"));
                warn!(run_id, error = %e, "deployment failed");
                result.deployment_status = Some(DeploymentStatus::Failed);
                return;
            }
        };
        result.github_url = Some(push.repo_url.clone());
        if !push.complete() {
            warn!(run_id, failed = ?push.failed_uploads, "some files were not uploaded");
        }

        match self.deployer.publish_static_site(target, dir).await {
            Ok(url) => {
                result.pages_url = Some(url);
                result.deployment_status = Some(if push.complete() {
                    DeploymentStatus::Success
                } else {
                    DeploymentStatus::Failed
                });
            }
            Err(e) => {
                warn!(run_id, error = %format!("{e:#}"), "pages activation failed");
                result.deployment_status = Some(DeploymentStatus::Failed);
            }
        }
    }
}

const RESERVE_ATTEMPTS: usize = 8;

/// Create a fresh, empty run directory under `root`. An id that is already
/// taken is replaced with a newly drawn one so no run writes into another.
fn reserve_project_dir(root: &Path, run_id: &str, project_name: Option<&str>) -> Result<PathBuf, SiteGenError> {
    let storage = |e: std::io::Error| SiteGenError::Materialization(format!("creating project directory: {e}"));
    fs::create_dir_all(root).map_err(storage)?;

    let mut id = run_id.to_string();
    for _ in 0..RESERVE_ATTEMPTS {
        let dir = root.join(&id);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(run_id = %id, "run directory already exists, drawing a new id");
                id = allocate_run_id(project_name);
            }
            Err(e) => return Err(storage(e)),
        }
    }
    Err(SiteGenError::Materialization(format!(
        "no free run directory under {} after {RESERVE_ATTEMPTS} attempts",
        root.display()
    )))
}

/// `<slug>-<8 hex>` when a project name is given, `site-<8 hex>` otherwise.
pub fn allocate_run_id(project_name: Option<&str>) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    let prefix = project_name.map(slugify).filter(|s| !s.is_empty());
    format!("{}-{}", prefix.as_deref().unwrap_or("site"), suffix)
}

fn slugify(name: &str) -> String {
    let mut out = String::new();
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    trimmed.chars().take(40).collect::<String>().trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testing::RecordingDeployer;
    use crate::materialize::docs::DOC_FILE;
    use crate::provider::testing::{Scripted, ScriptedGenerator};
    use fs_err as fs;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;

    fn requirements_reply() -> String {
        let rec = json!({
            "structural_demand": {
                "purpose": "Contact form collecting name, email and phone",
                "layout": "Single centered card",
                "content": ["Name field", "Email field", "Phone field", "Submit button"],
                "semantic_structure": "main > form with labelled inputs"
            },
            "styling_demand": { "visual_design": "Clean, light theme" },
            "scripting_demand": { "interactions": "Client-side validation" }
        });
        format!("```json\n{rec}\n```")
    }

    fn bundle_reply() -> String {
        let bundle = json!({
            "html": { "fileDir": "index.html", "content": "<!DOCTYPE html>\n<html lang=\"en\"><head><link rel=\"stylesheet\" href=\"css/form.css\"></head><body><main><form>\n<label for=\"name\">Name</label><input id=\"name\" name=\"name\">\n<label for=\"email\">Email</label><input id=\"email\" type=\"email\">\n<label for=\"phone\">Phone</label><input id=\"phone\" type=\"tel\">\n</form></main><script src=\"js/form.js\"></script></body></html>" },
            "css": { "fileDir": "css/form.css", "content": "main { display: grid; place-items: center; min-height: 100vh; }\nform { display: flex; flex-direction: column; gap: .5rem; }" },
            "js": { "fileDir": "js/form.js", "content": "const form = document.querySelector('form');\nform.addEventListener('submit', (e) => { if (!form.checkValidity()) e.preventDefault(); });" }
        });
        format!("Here is your project:\n```json\n{bundle}\n```\nEnjoy!")
    }

    fn scripted(replies: Vec<String>) -> ScriptedGenerator {
        ScriptedGenerator::new(replies.into_iter().map(Scripted::Reply).collect())
    }

    struct Fixture {
        root: tempfile::TempDir,
        generator: Arc<ScriptedGenerator>,
        deployer: Arc<RecordingDeployer>,
    }

    impl Fixture {
        fn new(generator: ScriptedGenerator, deployer: RecordingDeployer) -> Self {
            Self { root: tempfile::tempdir().unwrap(), generator: Arc::new(generator), deployer: Arc::new(deployer) }
        }

        fn pipeline(&self) -> Pipeline {
            let cfg = Config { projects_root: self.root.path().display().to_string(), ..Config::default() };
            Pipeline::new(self.generator.clone(), self.deployer.clone(), &cfg)
        }
    }

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest { prompt: prompt.into(), ..GenerateRequest::default() }
    }

    fn full_deploy() -> DeployRequest {
        DeployRequest { token: Some("ghp_expired".into()), username: Some("octo".into()), repo_name: Some("contact".into()) }
    }

    #[tokio::test]
    async fn contact_form_end_to_end() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), bundle_reply()]),
            RecordingDeployer::default(),
        );
        let res = fx.pipeline().run(&request("Create a contact form with name, email, phone")).await;

        assert!(res.success, "{:?}", res.error);
        let rec = res.requirements_record.as_ref().unwrap();
        assert!(rec.structural_demand.purpose.to_lowercase().contains("form"));
        assert_eq!(res.files_written, vec!["html: index.html", "css: css/form.css", "js: js/form.js"]);
        assert_eq!(res.files_created, vec!["index.html", "css/form.css", "js/form.js", DOC_FILE]);

        let dir = PathBuf::from(res.project_path.as_ref().unwrap());
        let html = fs::read_to_string(dir.join("index.html")).unwrap();
        for field in ["name", "email", "phone"] {
            assert!(html.contains(&format!("<label for=\"{field}\">")));
        }
        assert!(dir.join("css/form.css").is_file());
        assert!(dir.join("js/form.js").is_file());
        assert!(dir.join(DOC_FILE).is_file());
        assert!(res.preview_url.as_ref().unwrap().ends_with("/index.html"));
        assert!(res.deployment_status.is_none());
        assert_eq!(fx.generator.call_count(), 2);
    }

    #[tokio::test]
    async fn broken_synthesis_falls_back() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), "```json\n{\"html\": {\"fileDir\": \"index.html\", \"content\": \"<ht".into()]),
            RecordingDeployer::default(),
        );
        let res = fx.pipeline().run(&request("Create a contact form")).await;

        assert!(res.success);
        assert_eq!(
            res.files_written,
            vec![
                format!("html: {}", fallback::HTML_PATH),
                format!("css: {}", fallback::CSS_PATH),
                format!("js: {}", fallback::JS_PATH),
            ]
        );
        let dir = PathBuf::from(res.project_path.unwrap());
        assert!(fs::read_to_string(dir.join("index.html")).unwrap().contains("Content generated from:"));
    }

    #[tokio::test]
    async fn failed_synthesis_call_falls_back() {
        let fx = Fixture::new(
            ScriptedGenerator::new(vec![Scripted::Reply(requirements_reply()), Scripted::Fail("deadline exceeded".into())]),
            RecordingDeployer::default(),
        );
        let res = fx.pipeline().run(&request("x")).await;
        assert!(res.success);
        assert_eq!(res.files_written.len(), 3);
        assert!(res.error.is_none());
    }

    #[tokio::test]
    async fn invalid_bundle_falls_back() {
        let empty_js = json!({
            "html": { "fileDir": "index.html", "content": "<html></html>" },
            "css": { "fileDir": "style.css", "content": "body {}" },
            "js": { "fileDir": "app.js", "content": "" }
        })
        .to_string();
        let fx = Fixture::new(scripted(vec![requirements_reply(), empty_js]), RecordingDeployer::default());
        let res = fx.pipeline().run(&request("x")).await;
        assert!(res.success);
        assert!(res.files_written.contains(&format!("js: {}", fallback::JS_PATH)));
    }

    #[tokio::test]
    async fn expired_token_marks_deployment_failed_only() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), bundle_reply()]),
            RecordingDeployer::failing("checking repository contact: 401 Unauthorized Bad credentials"),
        );
        let req = GenerateRequest { deploy: Some(full_deploy()), ..request("Create a contact form") };
        let res = fx.pipeline().run(&req).await;

        assert!(res.success);
        assert_eq!(res.deployment_status, Some(DeploymentStatus::Failed));
        assert!(res.error.is_none());
        assert!(Path::new(res.project_path.as_ref().unwrap()).is_dir());
        assert_eq!(fx.deployer.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_repo_name_skips_deployment() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), bundle_reply()]),
            RecordingDeployer::default(),
        );
        let deploy = DeployRequest { repo_name: None, ..full_deploy() };
        let res = fx.pipeline().run(&GenerateRequest { deploy: Some(deploy), ..request("x") }).await;

        assert!(res.success);
        assert_eq!(res.deployment_status, Some(DeploymentStatus::Skipped));
        assert_eq!(fx.deployer.call_count(), 0);
        assert!(res.github_url.is_none());
    }

    #[tokio::test]
    async fn successful_deployment_fills_urls() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), bundle_reply()]),
            RecordingDeployer::default(),
        );
        let res = fx.pipeline().run(&GenerateRequest { deploy: Some(full_deploy()), ..request("x") }).await;
        assert_eq!(res.deployment_status, Some(DeploymentStatus::Success));
        assert_eq!(res.github_url.as_deref(), Some("https://github.com/octo/contact"));
        assert_eq!(res.pages_url.as_deref(), Some("https://octo.github.io/contact/"));
    }

    #[tokio::test]
    async fn partial_upload_is_a_failed_deployment() {
        let deployer = RecordingDeployer { failed_uploads: vec!["js/form.js".into()], ..RecordingDeployer::default() };
        let fx = Fixture::new(scripted(vec![requirements_reply(), bundle_reply()]), deployer);
        let res = fx.pipeline().run(&GenerateRequest { deploy: Some(full_deploy()), ..request("x") }).await;
        assert!(res.success);
        assert_eq!(res.deployment_status, Some(DeploymentStatus::Failed));
        assert!(res.pages_url.is_some());
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_call() {
        let fx = Fixture::new(ScriptedGenerator::unconfigured(), RecordingDeployer::default());
        let res = fx.pipeline().run(&request("x")).await;
        assert!(!res.success);
        assert!(res.error.as_deref().unwrap().contains("GOOGLE_API_KEY"));
        assert!(res.project_path.is_none());
        assert_eq!(fx.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn amplification_failure_aborts_without_writing() {
        let fx = Fixture::new(ScriptedGenerator::replies(&["Sorry, I can only answer in prose."]), RecordingDeployer::default());
        let req = GenerateRequest { deploy: Some(full_deploy()), ..request("x") };
        let res = fx.pipeline().run(&req).await;

        assert!(!res.success);
        assert!(res.error.as_deref().unwrap().starts_with("amplification failed"));
        assert!(res.preview_url.is_none() && res.download_url.is_none());
        assert!(res.deployment_status.is_none());
        assert_eq!(fs::read_dir(fx.root.path()).unwrap().count(), 0);
        assert_eq!(fx.generator.call_count(), 1);
    }

    #[tokio::test]
    async fn storage_failure_aborts() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), bundle_reply()]),
            RecordingDeployer::default(),
        );
        let blocked = fx.root.path().join("blocked");
        fs::write(&blocked, "file, not dir").unwrap();
        let cfg = Config { projects_root: blocked.display().to_string(), ..Config::default() };
        let p = Pipeline::new(fx.generator.clone(), fx.deployer.clone(), &cfg);
        let res = p.run(&request("x")).await;
        assert!(!res.success);
        assert!(res.error.as_deref().unwrap().starts_with("materialization failed"));
    }

    #[tokio::test]
    async fn observer_sees_stage_sequence() {
        let fx = Fixture::new(
            scripted(vec![requirements_reply(), "no json here".into()]),
            RecordingDeployer::default(),
        );
        let seen = Mutex::new(Vec::new());
        fx.pipeline().run_observed(&request("x"), &|s| seen.lock().unwrap().push(s)).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Stage::Amplifying, Stage::Synthesizing, Stage::Recovering, Stage::Materializing, Stage::Done]
        );
    }

    #[test]
    fn run_ids_are_slugged_and_unique() {
        let a = allocate_run_id(Some("My Portfolio!"));
        assert!(a.starts_with("my-portfolio-"), "{a}");
        assert_eq!(a.len(), "my-portfolio-".len() + 8);
        assert!(allocate_run_id(None).starts_with("site-"));
        assert!(allocate_run_id(Some("!!!")).starts_with("site-"));
        assert_ne!(allocate_run_id(None), allocate_run_id(None));
    }

    #[test]
    fn taken_run_directory_is_never_reused() {
        let root = tempfile::tempdir().unwrap();
        let taken = root.path().join("shop-0badcafe");
        fs::create_dir_all(&taken).unwrap();
        fs::write(taken.join("index.html"), "earlier run").unwrap();

        let dir = reserve_project_dir(root.path(), "shop-0badcafe", Some("Shop")).unwrap();
        assert_ne!(dir, taken);
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("shop-"));
        assert!(fs::read_dir(&dir).unwrap().next().is_none());
        assert_eq!(fs::read_to_string(taken.join("index.html")).unwrap(), "earlier run");
    }
}
