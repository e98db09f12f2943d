use anyhow::{Context, Result};
use axum::extract::{FromRequest, Multipart, Path as UrlPath, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use fs_err as fs;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::archive;
use crate::config::{env_secret, Config};
use crate::links;
use crate::pipeline::{DeployRequest, GenerateRequest, Pipeline};
use crate::provider::guess_mime;
use crate::safety::{is_within_root, resolve_within};

pub mod intake;

const TEXT_EXTENSIONS: [&str; 5] = ["html", "css", "js", "json", "md"];

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub projects_root: PathBuf,
    pub uploads_dir: PathBuf,
    pub figma_api_base: String,
    pub http: reqwest::Client,
    pub default_github_token: Option<String>,
    pub default_figma_token: Option<String>,
}

impl AppState {
    pub fn from_config(cfg: &Config, pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            projects_root: cfg.projects_root(),
            uploads_dir: cfg.uploads_dir(),
            figma_api_base: cfg.figma_api_base.clone(),
            http: reqwest::Client::new(),
            default_github_token: env_secret("GITHUB_TOKEN"),
            default_figma_token: env_secret("FIGMA_TOKEN"),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/preview/:token/", get(preview_root))
        .route("/api/preview/:token/*path", get(preview_file))
        .route("/api/files/:token", get(list_files))
        .route("/api/download/:token", get(download))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(cfg: &Config, pipeline: Arc<Pipeline>) -> Result<()> {
    fs::create_dir_all(cfg.projects_root())?;
    fs::create_dir_all(cfg.uploads_dir())?;
    let app = router(AppState::from_config(cfg, pipeline));
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    info!(addr = %cfg.bind, projects = %cfg.projects_root, "serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "success": false, "error": self.1 }))).into_response()
    }
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, msg.into())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Fields accepted by `/api/generate`, as JSON or multipart form fields.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateForm {
    prompt: Option<String>,
    description: Option<String>,
    project_name: Option<String>,
    #[serde(deserialize_with = "flag")]
    auto_deploy: bool,
    github_username: Option<String>,
    repo_name: Option<String>,
    github_token: Option<String>,
    figma_url: Option<String>,
    figma_token: Option<String>,
    canvas_data: Option<String>,
    #[serde(skip)]
    image: Option<(String, Bytes)>,
}

/// Accepts `true`, `"true"`, `"1"`, `"on"`.
fn flag<'de, D: serde::Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => parse_flag(&s),
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    })
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes")
}

impl GenerateForm {
    fn set_text(&mut self, name: &str, value: String) {
        let slot = match name {
            "prompt" => &mut self.prompt,
            "description" => &mut self.description,
            "project_name" => &mut self.project_name,
            "github_username" => &mut self.github_username,
            "repo_name" => &mut self.repo_name,
            "github_token" => &mut self.github_token,
            "figma_url" => &mut self.figma_url,
            "figma_token" => &mut self.figma_token,
            "canvas_data" => &mut self.canvas_data,
            "auto_deploy" => {
                self.auto_deploy = parse_flag(&value);
                return;
            }
            _ => return,
        };
        *slot = Some(value);
    }

    async fn from_multipart(mut mp: Multipart) -> Result<Self, ApiError> {
        let mut form = GenerateForm::default();
        while let Some(field) = mp.next_field().await.map_err(|e| bad_request(e.to_string()))? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let file_name = field.file_name().unwrap_or("upload.png").to_string();
                let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
                if !bytes.is_empty() {
                    form.image = Some((file_name, bytes));
                }
            } else {
                let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
                form.set_text(&name, text);
            }
        }
        Ok(form)
    }

    fn prompt(&self) -> Option<String> {
        [&self.prompt, &self.description]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(String::from)
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

async fn generate(State(state): State<AppState>, req: Request) -> Response {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let form = if is_multipart {
        match Multipart::from_request(req, &state).await {
            Ok(mp) => GenerateForm::from_multipart(mp).await,
            Err(e) => Err(bad_request(e.body_text())),
        }
    } else {
        match Json::<GenerateForm>::from_request(req, &state).await {
            Ok(Json(f)) => Ok(f),
            Err(e) => Err(bad_request(e.body_text())),
        }
    };
    let form = match form {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };

    let Some(prompt) = form.prompt() else {
        return bad_request("Description is required").into_response();
    };

    let image = resolve_image(&state, &form).await;
    let deploy = form.auto_deploy.then(|| DeployRequest {
        token: non_blank(&form.github_token).map(String::from).or_else(|| state.default_github_token.clone()),
        username: form.github_username.clone(),
        repo_name: form.repo_name.clone(),
    });
    let request = GenerateRequest { prompt, project_name: form.project_name.clone(), image, deploy };

    let result = state.pipeline.run(&request).await;
    let status = if result.success { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(result)).into_response()
}

/// Uploaded file, then canvas drawing, then Figma export. Failures are
/// logged and generation continues without an image.
async fn resolve_image(state: &AppState, form: &GenerateForm) -> Option<PathBuf> {
    if let Some((name, bytes)) = &form.image {
        match intake::save_upload(&state.uploads_dir, name, bytes) {
            Ok(p) => return Some(p),
            Err(e) => warn!(error = %e, "ignoring uploaded image"),
        }
    }
    if let Some(data) = non_blank(&form.canvas_data) {
        match intake::save_canvas(&state.uploads_dir, data) {
            Ok(p) => return Some(p),
            Err(e) => warn!(error = %e, "ignoring canvas data"),
        }
    }
    let figma_url = non_blank(&form.figma_url)?;
    let token = non_blank(&form.figma_token).map(String::from).or_else(|| state.default_figma_token.clone());
    let Some(token) = token else {
        warn!("figma_url given without a Figma token, ignoring");
        return None;
    };
    match intake::fetch_figma_image(&state.http, &state.figma_api_base, figma_url, &token, &state.uploads_dir).await {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(error = %e, "ignoring Figma link");
            None
        }
    }
}

/// Decode a token and make sure it names a project directory under the
/// projects root.
fn project_dir(state: &AppState, token: &str) -> Result<PathBuf, ApiError> {
    let dir = links::decode_token(token).ok_or_else(|| bad_request("Invalid project token"))?;
    if !dir.is_dir() {
        return Err(ApiError(StatusCode::NOT_FOUND, "Project not found".into()));
    }
    if !is_within_root(&dir, &state.projects_root) {
        return Err(ApiError(StatusCode::FORBIDDEN, "Forbidden".into()));
    }
    Ok(dir)
}

async fn preview_root(State(state): State<AppState>, UrlPath(token): UrlPath<String>) -> Response {
    serve_project_file(&state, &token, "")
}

async fn preview_file(State(state): State<AppState>, UrlPath((token, path)): UrlPath<(String, String)>) -> Response {
    serve_project_file(&state, &token, &path)
}

fn serve_project_file(state: &AppState, token: &str, rel: &str) -> Response {
    let dir = match project_dir(state, token) {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };
    let Some(mut path) = resolve_within(&dir, rel) else {
        warn!(path = rel, "preview path escapes project");
        return ApiError(StatusCode::FORBIDDEN, "Forbidden".into()).into_response();
    };
    if path.is_dir() {
        path = path.join("index.html");
    }
    match fs::read(&path) {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for(&path))], bytes).into_response(),
        Err(_) => ApiError(StatusCode::NOT_FOUND, "File not found".into()).into_response(),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" => "application/json",
        "md" => "text/markdown; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "ico" => "image/x-icon",
        _ => guess_mime(path),
    }
}

async fn list_files(State(state): State<AppState>, UrlPath(token): UrlPath<String>) -> Response {
    let dir = match project_dir(&state, &token) {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(&dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let is_text = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e));
        if !entry.file_type().is_file() || !is_text {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&dir) else { continue };
        let key = rel.to_string_lossy().replace('\\', "/");
        let content = fs::read_to_string(entry.path()).unwrap_or_else(|_| "// (binary or unreadable)".into());
        files.insert(key, content);
    }
    Json(json!({ "files": files })).into_response()
}

async fn download(State(state): State<AppState>, UrlPath(token): UrlPath<String>) -> Response {
    let dir = match project_dir(&state, &token) {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };
    match archive::zip_directory(&dir) {
        Ok(bytes) => {
            let disposition = format!("attachment; filename=\"{}\"", archive::archive_name(&dir));
            (
                [(header::CONTENT_TYPE, "application/zip".to_string()), (header::CONTENT_DISPOSITION, disposition)],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %format!("{e:#}"), "archive failed");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Could not build archive".into()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testing::RecordingDeployer;
    use crate::provider::testing::{Scripted, ScriptedGenerator};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use serde_json::Value;
    use tower::ServiceExt;

    const REQUIREMENTS: &str = r#"{"structural_demand":{"purpose":"Bakery landing page"},"styling_demand":{"visual_design":"Warm"},"scripting_demand":{"interactions":"Menu toggle"}}"#;
    const BUNDLE: &str = r#"{"html":{"fileDir":"index.html","content":"<!DOCTYPE html><html><head><link rel=\"stylesheet\" href=\"css/site.css\"></head><body><h1>Bakery</h1><script src=\"js/site.js\"></script></body></html>"},"css":{"fileDir":"css/site.css","content":"body { margin: 0; background: #fdf6ec; font-family: Georgia, serif; }"},"js":{"fileDir":"js/site.js","content":"const h = document.querySelector('h1');\nh.addEventListener('click', () => h.classList.toggle('on'));"}}"#;

    struct Harness {
        root: tempfile::TempDir,
        generator: Arc<ScriptedGenerator>,
        state: AppState,
    }

    fn harness(script: Vec<Scripted>) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let cfg = Config {
            projects_root: root.path().join("projects").display().to_string(),
            uploads_dir: root.path().join("uploads").display().to_string(),
            ..Config::default()
        };
        let generator = Arc::new(ScriptedGenerator::new(script));
        let pipeline = Arc::new(Pipeline::new(generator.clone(), Arc::new(RecordingDeployer::default()), &cfg));
        fs::create_dir_all(cfg.projects_root()).unwrap();
        let state = AppState {
            pipeline,
            projects_root: cfg.projects_root(),
            uploads_dir: cfg.uploads_dir(),
            figma_api_base: cfg.figma_api_base.clone(),
            http: reqwest::Client::new(),
            default_github_token: None,
            default_figma_token: None,
        };
        Harness { root, generator, state }
    }

    fn happy() -> Vec<Scripted> {
        vec![Scripted::Reply(REQUIREMENTS.into()), Scripted::Reply(BUNDLE.into())]
    }

    async fn call(state: &AppState, req: HttpRequest<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let ct = resp.headers().get(header::CONTENT_TYPE).map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec();
        (status, body, ct)
    }

    fn get_req(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/api/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness(vec![]);
        let (status, body, _) = call(&h.state, get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn generate_requires_a_description() {
        let h = harness(vec![]);
        let (status, body, _) = call(&h.state, post_json(json!({ "prompt": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v, json!({ "success": false, "error": "Description is required" }));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn generate_then_preview_list_and_download() {
        let h = harness(happy());
        let (status, body, _) = call(&h.state, post_json(json!({ "description": "Bakery landing page", "project_name": "Bakery" }))).await;
        assert_eq!(status, StatusCode::OK);
        let res: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(res["success"], json!(true));
        assert!(res["project_path"].as_str().unwrap().contains("bakery-"));
        assert!(res.get("deployment_status").is_none());

        let preview = res["preview_url"].as_str().unwrap();
        let (status, body, ct) = call(&h.state, get_req(preview)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some("text/html; charset=utf-8"));
        assert!(String::from_utf8(body).unwrap().contains("<h1>Bakery</h1>"));

        let token = preview.trim_start_matches("/api/preview/").split('/').next().unwrap();
        let (status, _, ct) = call(&h.state, get_req(&format!("/api/preview/{token}/css/site.css"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some("text/css; charset=utf-8"));

        let (status, body, _) = call(&h.state, get_req(&format!("/api/preview/{token}/"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("<!DOCTYPE html>"));

        let (status, _, _) = call(&h.state, get_req(&format!("/api/preview/{token}/missing.js"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body, _) = call(&h.state, get_req(&format!("/api/files/{token}"))).await;
        let files: Value = serde_json::from_slice(&body).unwrap();
        let names: Vec<&String> = files["files"].as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["PROJECT_REQUIREMENTS.md", "css/site.css", "index.html", "js/site.js"]);

        let download = res["download_url"].as_str().unwrap();
        let (status, body, ct) = call(&h.state, get_req(download)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some("application/zip"));
        assert!(body.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn preview_rejects_traversal_and_foreign_dirs() {
        let h = harness(happy());
        let (_, body, _) = call(&h.state, post_json(json!({ "prompt": "Bakery" }))).await;
        let res: Value = serde_json::from_slice(&body).unwrap();
        let project = PathBuf::from(res["project_path"].as_str().unwrap());
        fs::write(h.root.path().join("secret.txt"), "s3cret").unwrap();
        let token = links::preview_token(&project);

        let (status, _, _) = call(&h.state, get_req(&format!("/api/preview/{token}/..%2F..%2Fsecret.txt"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let outside = links::preview_token(h.root.path());
        let (status, _, _) = call(&h.state, get_req(&format!("/api/preview/{outside}/secret.txt"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _, _) = call(&h.state, get_req(&format!("/api/download/{outside}"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let whole_root = links::preview_token(&h.state.projects_root);
        let (status, _, _) = call(&h.state, get_req(&format!("/api/files/{whole_root}"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _, _) = call(&h.state, get_req(&format!("/api/download/{whole_root}"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = call(&h.state, get_req("/api/files/not*base64")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn amplification_failure_is_a_500_with_the_result() {
        let h = harness(vec![Scripted::Fail("quota exhausted".into())]);
        let (status, body, _) = call(&h.state, post_json(json!({ "prompt": "x" }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["success"], json!(false));
        assert!(v["error"].as_str().unwrap().contains("quota exhausted"));
        assert!(v["project_path"].is_null());
    }

    #[tokio::test]
    async fn auto_deploy_without_repo_is_skipped() {
        let h = harness(happy());
        let body = json!({ "prompt": "x", "auto_deploy": "true", "github_username": "octo", "github_token": "t" });
        let (status, body, _) = call(&h.state, post_json(body)).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["deployment_status"], json!("skipped"));
    }

    #[tokio::test]
    async fn multipart_canvas_is_sent_as_image() {
        let h = harness(happy());
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\nRecreate my sketch\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"canvas_data\"\r\n\r\ndata:image/png;base64,aGVsbG8=\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/generate")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, _, _) = call(&h.state, req).await;
        assert_eq!(status, StatusCode::OK);

        let uploads = h.generator.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].contains("canvas_"));
        let calls = h.generator.calls.lock().unwrap();
        assert!(matches!(&calls[0].parts[1], crate::wire::ContentPart::Text(t) if t == "Recreate my sketch"));
    }

    #[tokio::test]
    async fn bad_canvas_data_is_ignored() {
        let h = harness(happy());
        let (status, _, _) = call(&h.state, post_json(json!({ "prompt": "x", "canvas_data": "data:text/html,hi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.generator.uploads.lock().unwrap().is_empty());
    }
}
