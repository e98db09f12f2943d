use thiserror::Error;

/// Failure categories a generation run can hit. Only `Configuration`,
/// `Amplification` and `Materialization` abort a run.
#[derive(Error, Debug)]
pub enum SiteGenError {
    #[error("configuration error: {0}")] Configuration(String),
    #[error("amplification failed: {0}")] Amplification(String),
    #[error("synthesis failed: {0}")] Synthesis(String),
    #[error("materialization failed: {0}")] Materialization(String),
    #[error("deployment failed: {0}")] Deployment(String),
    #[error("image intake failed: {0}")] Intake(String),
}

impl SiteGenError {
    /// Whether this failure flips a run to `success: false`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SiteGenError::Configuration(_) | SiteGenError::Amplification(_) | SiteGenError::Materialization(_)
        )
    }
}
