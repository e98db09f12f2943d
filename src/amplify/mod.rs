use std::path::Path;
use tracing::{info, warn};

use crate::errors::SiteGenError;
use crate::extract::{self, Shape};
use crate::log::StageLog;
use crate::prompt;
use crate::provider::Generator;
use crate::wire::{ContentPart, GenerationCall, RequirementsRecord};

pub const STAGE: &str = "amplify";

/// Stage 1: expand a terse prompt (and optional reference image) into a
/// requirements record. There is no fallback record, so every failure here is
/// fatal to the run.
pub async fn amplify(
    generator: &dyn Generator,
    prompt_text: &str,
    image: Option<&Path>,
    log: &StageLog,
) -> Result<RequirementsRecord, SiteGenError> {
    let mut parts = Vec::with_capacity(2);
    if let Some(path) = image {
        let uploaded = generator
            .upload(path)
            .await
            .map_err(|e| SiteGenError::Amplification(format!("image upload failed: {e:#}")))?;
        info!(run_id = log.run_id(), path = %path.display(), mime = %uploaded.mime_type, "reference image attached");
        parts.push(ContentPart::File(uploaded));
    }
    parts.push(ContentPart::Text(prompt_text.to_string()));

    let call = GenerationCall { system_instruction: prompt::system_prompt_amplify(), parts };
    log.request(STAGE, &call.system_instruction);

    let reply = generator
        .generate(&call)
        .await
        .map_err(|e| SiteGenError::Amplification(format!("{e:#}")))?;
    log.response(STAGE, &reply.text);

    parse_requirements(&reply.text).ok_or_else(|| {
        warn!(run_id = log.run_id(), bytes = reply.text.len(), "amplification reply held no requirements record");
        SiteGenError::Amplification("no valid requirements record found in generator reply".into())
    })
}

/// Extract and type a requirements record from raw reply text.
pub fn parse_requirements(text: &str) -> Option<RequirementsRecord> {
    let found = extract::extract(text, Shape::Requirements).found()?;
    serde_json::from_value(found.into_value()).ok()
}
