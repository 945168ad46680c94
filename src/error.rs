use thiserror::Error;

/// Failures of a single measurement strategy.
///
/// None of these reach the caller of a speed test: the orchestrator turns
/// each of them into "try the next tier".
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient latency samples: need {needed}, have {have}")]
    InsufficientSamples { needed: usize, have: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("all {attempted} connections failed")]
    AllConnectionsFailed { attempted: usize },

    #[error("all {attempted} alternative sources failed")]
    AllAlternativesFailed { attempted: usize },

    #[error("{metric} measurement unavailable")]
    MeasurementUnavailable { metric: &'static str },
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for EngineError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        EngineError::Transport("timed out".into())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
