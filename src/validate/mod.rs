use serde_json::Value;
use std::path::Path;

use crate::wire::FileBundle;

/// Entries shorter than this (trimmed) draw a warning.
pub const MIN_CONTENT_CHARS: usize = 50;

const JS_DECLARATIONS: [&str; 6] = ["function", "const", "let", "var", "class", "=>"];

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub warnings: Vec<String>,
}

impl Validation {
    fn invalid(reason: String) -> Self {
        Self { valid: false, warnings: vec![reason] }
    }
}

/// Structural check of a bundle-shaped value plus quality warnings.
///
/// Invalid when the value is not an object, a required key is missing, or an
/// entry lacks a non-empty string `fileDir` or `content`. Everything else is
/// a warning and leaves the bundle valid.
pub fn validate(bundle: &Value) -> Validation {
    let Some(obj) = bundle.as_object() else {
        return Validation::invalid("bundle is not a JSON object".into());
    };

    for key in FileBundle::KEYS {
        let Some(entry) = obj.get(key) else {
            return Validation::invalid(format!("missing required key: {key}"));
        };
        let Some(entry) = entry.as_object() else {
            return Validation::invalid(format!("invalid structure for {key}"));
        };
        for field in ["fileDir", "content"] {
            let present = entry
                .get(field)
                .and_then(Value::as_str)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return Validation::invalid(format!("missing {field} in {key}"));
            }
        }
    }

    let text = |key: &str, field: &str| obj[key][field].as_str().unwrap_or_default().to_string();
    let mut warnings = Vec::new();

    for key in FileBundle::KEYS {
        let len = text(key, "content").trim().chars().count();
        if len < MIN_CONTENT_CHARS {
            warnings.push(format!("{key} content seems too short: {len} characters"));
        }
    }

    let html = text("html", "content").to_lowercase();
    let has_css_link = html.contains("stylesheet") || html.contains("<link");
    let has_js_link = html.contains("<script");
    if !has_css_link {
        warnings.push("HTML might not be linked to CSS".into());
    } else if !references_file(&html, &text("css", "fileDir")) {
        warnings.push(format!("HTML does not reference the css file {}", text("css", "fileDir")));
    }
    if !has_js_link {
        warnings.push("HTML might not be linked to JS".into());
    } else if !references_file(&html, &text("js", "fileDir")) {
        warnings.push(format!("HTML does not reference the js file {}", text("js", "fileDir")));
    }

    let css = text("css", "content");
    if !(css.contains('{') && css.contains('}')) {
        warnings.push("CSS content might be malformed".into());
    }

    let js = text("js", "content");
    if !JS_DECLARATIONS.iter().any(|kw| js.contains(kw)) {
        warnings.push("JavaScript content might be incomplete".into());
    }

    Validation { valid: true, warnings }
}

/// Typed view of a bundle that passed [`validate`].
pub fn into_bundle(bundle: Value) -> Option<FileBundle> {
    serde_json::from_value(bundle).ok()
}

fn references_file(html_lower: &str, file_dir: &str) -> bool {
    match Path::new(file_dir).file_name().and_then(|n| n.to_str()) {
        Some(name) => html_lower.contains(&name.to_lowercase()),
        None => false,
    }
}
