use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::SiteGenError;
use crate::extract::{self, Extraction, Shape};
use crate::log::StageLog;
use crate::prompt;
use crate::provider::Generator;
use crate::wire::{GenerationCall, RequirementsRecord};

pub const STAGE: &str = "synthesize";

/// Raw stage-2 reply plus the bundle-shaped object recovered from it, if any.
/// The object has not been validated yet.
#[derive(Debug, Clone)]
pub struct SynthesisReply {
    pub text: String,
    pub bundle: Option<Value>,
}

/// Stage 2: turn the original prompt plus the full requirements record into a
/// three-file bundle.
///
/// A reply without a recoverable bundle is `Ok` with `bundle: None`; only a
/// failed generator call is `Err`. Either way the caller is expected to fall
/// back rather than abort.
pub async fn synthesize(
    generator: &dyn Generator,
    original_prompt: &str,
    requirements: &RequirementsRecord,
    log: &StageLog,
) -> Result<SynthesisReply, SiteGenError> {
    let call = GenerationCall::text(
        prompt::system_prompt_synthesize(),
        prompt::user_prompt_synthesize(original_prompt, requirements),
    );
    log.request(STAGE, &call.system_instruction);

    let reply = generator
        .generate(&call)
        .await
        .map_err(|e| SiteGenError::Synthesis(format!("{e:#}")))?;
    log.response(STAGE, &reply.text);

    let bundle = match extract::extract(&reply.text, Shape::Bundle) {
        Extraction::Found(found) => {
            debug!(run_id = log.run_id(), "bundle recovered from synthesis reply");
            Some(found.into_value())
        }
        Extraction::Malformed => {
            warn!(run_id = log.run_id(), bytes = reply.text.len(), "synthesis reply held no file bundle");
            None
        }
    };

    Ok(SynthesisReply { text: reply.text, bundle })
}
