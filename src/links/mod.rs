use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use std::path::{Path, PathBuf};

/// Opaque, URL-safe handle for a project directory.
pub fn preview_token(project_path: &Path) -> String {
    URL_SAFE.encode(project_path.to_string_lossy().as_bytes())
}

/// Inverse of [`preview_token`]. Accepts padded and unpadded tokens.
pub fn decode_token(token: &str) -> Option<PathBuf> {
    let bytes = URL_SAFE
        .decode(token)
        .or_else(|_| URL_SAFE_NO_PAD.decode(token.trim_end_matches('=')))
        .ok()?;
    let text = String::from_utf8(bytes).ok()?;
    if text.is_empty() {
        return None;
    }
    Some(PathBuf::from(text))
}

pub fn preview_url(project_path: &Path, entry_html: &str) -> String {
    format!("/api/preview/{}/{}", preview_token(project_path), entry_html.trim_start_matches('/'))
}

pub fn download_url(project_path: &Path) -> String {
    format!("/api/download/{}", preview_token(project_path))
}
