use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// ========================================
/// Generator call/reply
/// ========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationCall {
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
}

impl GenerationCall {
    pub fn text(system_instruction: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            parts: vec![ContentPart::Text(text.into())],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContentPart {
    Text(String),
    File(UploadedFile),
}

/// An image handed to the generator, either by reference to the provider's
/// file store or inlined as base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub mime_type: String,
    pub source: FileSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    Remote { uri: String },
    Inline { data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReply {
    pub text: String,
}

/// ========================================
/// Requirements record (amplification output)
/// ========================================

pub const NOT_SPECIFIED: &str = "Not specified";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementsRecord {
    #[serde(deserialize_with = "lenient_section")]
    pub structural_demand: StructuralDemand,
    #[serde(deserialize_with = "lenient_section")]
    pub styling_demand: StylingDemand,
    #[serde(deserialize_with = "lenient_section")]
    pub scripting_demand: ScriptingDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralDemand {
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub purpose: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub layout: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub content: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub semantic_structure: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylingDemand {
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub visual_design: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub responsive_design: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub animations: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub design_system: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptingDemand {
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub interactions: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub dynamic_content: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub api_integration: String,
    #[serde(default = "not_specified", deserialize_with = "lenient_text")]
    pub functionality: String,
}

/// A requirements section that can be built from a bare summary when the
/// model answers with a string instead of an object.
trait Section: DeserializeOwned {
    fn from_summary(summary: String) -> Self;
}

impl Section for StructuralDemand {
    fn from_summary(purpose: String) -> Self {
        Self { purpose, layout: not_specified(), content: not_specified(), semantic_structure: not_specified() }
    }
}

impl Section for StylingDemand {
    fn from_summary(visual_design: String) -> Self {
        Self { visual_design, responsive_design: not_specified(), animations: not_specified(), design_system: not_specified() }
    }
}

impl Section for ScriptingDemand {
    fn from_summary(interactions: String) -> Self {
        Self { interactions, dynamic_content: not_specified(), api_integration: not_specified(), functionality: not_specified() }
    }
}

/// Objects go through the per-leaf rules; anything else lands in the first
/// leaf as text.
fn lenient_section<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Section,
{
    match Value::deserialize(de)? {
        v @ Value::Object(_) => serde_json::from_value(v).map_err(D::Error::custom),
        other => Ok(T::from_summary(value_to_text(&other))),
    }
}

impl RequirementsRecord {
    pub const KEYS: [&'static str; 3] = ["structural_demand", "styling_demand", "scripting_demand"];

    /// (section title, [(field name, value)]) in document order.
    pub fn sections(&self) -> [(&'static str, [(&'static str, &str); 4]); 3] {
        let s = &self.structural_demand;
        let st = &self.styling_demand;
        let sc = &self.scripting_demand;
        [
            (
                "Structural Demand",
                [
                    ("purpose", s.purpose.as_str()),
                    ("layout", s.layout.as_str()),
                    ("content", s.content.as_str()),
                    ("semantic_structure", s.semantic_structure.as_str()),
                ],
            ),
            (
                "Styling Demand",
                [
                    ("visual_design", st.visual_design.as_str()),
                    ("responsive_design", st.responsive_design.as_str()),
                    ("animations", st.animations.as_str()),
                    ("design_system", st.design_system.as_str()),
                ],
            ),
            (
                "Scripting Demand",
                [
                    ("interactions", sc.interactions.as_str()),
                    ("dynamic_content", sc.dynamic_content.as_str()),
                    ("api_integration", sc.api_integration.as_str()),
                    ("functionality", sc.functionality.as_str()),
                ],
            ),
        ]
    }
}

fn not_specified() -> String {
    NOT_SPECIFIED.to_string()
}

/// Models don't always answer a leaf with a plain string; render whatever
/// came back as text instead of failing the whole record.
fn lenient_text<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(value_to_text(&v))
}

pub fn value_to_text(v: &Value) -> String {
    match v {
        Value::Null => not_specified(),
        Value::String(s) if s.trim().is_empty() => not_specified(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(value_to_text).collect();
            if parts.is_empty() { not_specified() } else { parts.join("; ") }
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, value_to_text(v)))
                .collect();
            if parts.is_empty() { not_specified() } else { parts.join("; ") }
        }
        other => other.to_string(),
    }
}

/// ========================================
/// File bundle (synthesis output)
/// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "fileDir")]
    pub file_dir: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBundle {
    pub html: FileEntry,
    pub css: FileEntry,
    pub js: FileEntry,
}

impl FileBundle {
    pub const KEYS: [&'static str; 3] = ["html", "css", "js"];

    pub fn entries(&self) -> [(&'static str, &FileEntry); 3] {
        [("html", &self.html), ("css", &self.css), ("js", &self.js)]
    }
}

/// ========================================
/// Pipeline result
/// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub project_path: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub files_written: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements_record: Option<RequirementsRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_created: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_status: Option<DeploymentStatus>,
}

impl GenerationResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            project_path: None,
            generated_at: Utc::now(),
            files_written: Vec::new(),
            preview_url: None,
            download_url: None,
            requirements_record: None,
            files_created: Vec::new(),
            error: Some(error.into()),
            github_url: None,
            pages_url: None,
            deployment_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_leaves_degrade_to_placeholder() {
        let rec: RequirementsRecord = serde_json::from_value(json!({
            "structural_demand": { "purpose": "A contact form" },
            "styling_demand": {},
            "scripting_demand": { "interactions": null }
        }))
        .unwrap();
        assert_eq!(rec.structural_demand.purpose, "A contact form");
        assert_eq!(rec.structural_demand.layout, NOT_SPECIFIED);
        assert_eq!(rec.styling_demand.animations, NOT_SPECIFIED);
        assert_eq!(rec.scripting_demand.interactions, NOT_SPECIFIED);
    }

    #[test]
    fn missing_section_is_an_error() {
        let res = serde_json::from_value::<RequirementsRecord>(json!({
            "structural_demand": {},
            "styling_demand": {}
        }));
        assert!(res.is_err());
    }

    #[test]
    fn non_object_sections_degrade_instead_of_failing() {
        let rec: RequirementsRecord = serde_json::from_value(json!({
            "structural_demand": "A contact form with name, email and phone",
            "styling_demand": { "visual_design": "Light" },
            "scripting_demand": null
        }))
        .unwrap();
        assert_eq!(rec.structural_demand.purpose, "A contact form with name, email and phone");
        assert_eq!(rec.structural_demand.layout, NOT_SPECIFIED);
        assert_eq!(rec.styling_demand.visual_design, "Light");
        assert_eq!(rec.scripting_demand, ScriptingDemand::from_summary(NOT_SPECIFIED.into()));

        let listed: RequirementsRecord = serde_json::from_value(json!({
            "structural_demand": {},
            "styling_demand": ["Dark", "Rounded"],
            "scripting_demand": {}
        }))
        .unwrap();
        assert_eq!(listed.styling_demand.visual_design, "Dark; Rounded");
    }

    #[test]
    fn non_string_leaves_are_rendered() {
        let rec: RequirementsRecord = serde_json::from_value(json!({
            "structural_demand": { "content": ["Name", "Email", "Phone"] },
            "styling_demand": { "visual_design": { "primary": "#119da4" } },
            "scripting_demand": { "functionality": 3 }
        }))
        .unwrap();
        assert_eq!(rec.structural_demand.content, "Name; Email; Phone");
        assert_eq!(rec.styling_demand.visual_design, "primary: #119da4");
        assert_eq!(rec.scripting_demand.functionality, "3");
    }

    #[test]
    fn file_entry_uses_camel_case_dir_key() {
        let e = FileEntry { file_dir: "index.html".into(), content: "<html></html>".into() };
        assert_eq!(serde_json::to_value(&e).unwrap(), json!({ "fileDir": "index.html", "content": "<html></html>" }));
    }

    #[test]
    fn deployment_fields_absent_unless_set() {
        let v = serde_json::to_value(GenerationResult::failed("amplification failed")).unwrap();
        assert_eq!(v["success"], json!(false));
        assert!(v["project_path"].is_null());
        assert!(v.get("deployment_status").is_none());
        assert!(v.get("github_url").is_none());
    }
}
