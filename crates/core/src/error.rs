use thiserror::Error;

/// The engine-wide error taxonomy.
///
/// Only `NotFound` and `InvalidSessionState` are rejections that callers see
/// directly. Upstream model failures are absorbed at the component boundary
/// and converted into degraded-but-valid results, so `UpstreamModel` and
/// `MalformedModelOutput` rarely escape the engine; they exist so components
/// can signal each other before degrading.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid session state: {0}")]
    InvalidSessionState(String),

    /// An LLM, embedding, or vision call failed or timed out after retries.
    #[error("upstream model call failed: {0}")]
    UpstreamModel(String),

    /// Structured output from the model could not be parsed.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),

    /// Report synthesis has not completed yet. Callers retry on a fixed
    /// schedule; this is not a failure state.
    #[error("evaluation report is not ready yet")]
    ReportNotReady,

    /// Report synthesis failed terminally (SLA breach or hard error).
    #[error("report synthesis failed: {0}")]
    ReportFailed(String),

    /// The selector has no unused question left. The state machine absorbs
    /// this by closing the interview early.
    #[error("question bank exhausted")]
    ExhaustedBank,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
