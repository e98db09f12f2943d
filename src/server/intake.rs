//! Turning whatever image the caller supplied into a local file the
//! generator can upload.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use fs_err as fs;
use reqwest::{Client, Url};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::SiteGenError;

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn intake<E: std::fmt::Display>(what: &str) -> impl FnOnce(E) -> SiteGenError + '_ {
    move |e| SiteGenError::Intake(format!("{what}: {e}"))
}

fn write_upload(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, SiteGenError> {
    fs::create_dir_all(dir).map_err(intake("creating uploads dir"))?;
    let path = dir.join(name);
    fs::write(&path, bytes).map_err(intake("saving image"))?;
    Ok(path)
}

/// Store an uploaded file under `uploads_dir`. Only the final component of
/// the client-supplied name is kept, prefixed with a short random id.
pub fn save_upload(uploads_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, SiteGenError> {
    if bytes.is_empty() {
        return Err(SiteGenError::Intake("uploaded image is empty".into()));
    }
    let base = Path::new(&file_name.replace('\\', "/"))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload.png".into());
    let path = write_upload(uploads_dir, &format!("{}_{}", short_id(), base), bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "saved uploaded image");
    Ok(path)
}

/// Decode a `data:image/...;base64,` URL from the drawing canvas.
pub fn save_canvas(uploads_dir: &Path, data_url: &str) -> Result<PathBuf, SiteGenError> {
    let data_url = data_url.trim();
    let Some(rest) = data_url.strip_prefix("data:image/") else {
        return Err(SiteGenError::Intake("canvas data is not an image data URL".into()));
    };
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| SiteGenError::Intake("canvas data URL has no payload".into()))?;
    let ext = match meta.split(';').next().unwrap_or_default() {
        "jpeg" | "jpg" => "jpg",
        "webp" => "webp",
        "gif" => "gif",
        _ => "png",
    };
    let bytes = BASE64.decode(payload.trim()).map_err(intake("decoding canvas data"))?;
    let path = write_upload(uploads_dir, &format!("canvas_{}.{ext}", short_id()), &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "saved canvas wireframe");
    Ok(path)
}

/// File key and optional `node-id` from a `figma.com/file/<key>/...` or
/// `figma.com/design/<key>/...` link.
pub fn figma_key_and_node(figma_url: &str) -> Option<(String, Option<String>)> {
    let url = Url::parse(figma_url.trim()).ok()?;
    let mut segs = url.path_segments()?.filter(|s| !s.is_empty());
    let kind = segs.next()?;
    if kind != "file" && kind != "design" {
        return None;
    }
    let key = segs.next()?.to_string();
    let node = url
        .query_pairs()
        .find(|(k, _)| k == "node-id")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty());
    Some((key, node))
}

/// Export a Figma frame as a 2x PNG into `uploads_dir`. Without a `node-id`
/// the first page of the file is exported.
pub async fn fetch_figma_image(
    client: &Client,
    api_base: &str,
    figma_url: &str,
    token: &str,
    uploads_dir: &Path,
) -> Result<PathBuf, SiteGenError> {
    let (key, node) =
        figma_key_and_node(figma_url).ok_or_else(|| SiteGenError::Intake(format!("not a Figma file link: {figma_url}")))?;
    let api = api_base.trim_end_matches('/');

    let node = match node {
        Some(n) => n,
        None => {
            let meta: Value = client
                .get(format!("{api}/v1/files/{key}"))
                .header("X-FIGMA-TOKEN", token)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(intake("fetching Figma file"))?
                .json()
                .await
                .map_err(intake("decoding Figma file"))?;
            meta.pointer("/document/children/0/id")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| SiteGenError::Intake("Figma file has no pages".into()))?
        }
    };
    debug!(key = %key, node = %node, "exporting Figma node");

    let images: Value = client
        .get(format!("{api}/v1/images/{key}"))
        .header("X-FIGMA-TOKEN", token)
        .query(&[("ids", node.as_str()), ("format", "png"), ("scale", "2")])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(intake("requesting Figma export"))?
        .json()
        .await
        .map_err(intake("decoding Figma export"))?;
    let image_url = images
        .get("images")
        .and_then(|m| m.get(&node))
        .and_then(Value::as_str)
        .ok_or_else(|| SiteGenError::Intake(format!("Figma returned no image for node {node}")))?;

    let bytes = client
        .get(image_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(intake("downloading Figma export"))?
        .bytes()
        .await
        .map_err(intake("downloading Figma export"))?;

    let path = write_upload(uploads_dir, &figma_file_name(&key, &node), &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "saved Figma export");
    Ok(path)
}

/// `figma_<key>_<node>.png`, with everything outside `[A-Za-z0-9_-]` mapped
/// to `-` so link contents cannot shape the path.
fn figma_file_name(key: &str, node: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
            .collect()
    };
    format!("figma_{}_{}.png", clean(key), clean(node))
}
