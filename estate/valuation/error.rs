use thiserror::Error;

/// Result alias used across the valuation core.
pub type ValuationResult<T> = Result<T, ValuationError>;

/// Errors surfaced by ports and use cases.
#[derive(Debug, Error)]
pub enum ValuationError {
    /// Input failed entity-level or service-level validation.
    #[error("invalid input: {}", .0.join("; "))]
    InvalidInput(Vec<String>),
    /// The data source could not be read or parsed.
    #[error("data access failure: {0}")]
    DataAccess(String),
    /// The training backend failed during fit or evaluation.
    #[error("training failure: {0}")]
    Training(String),
    /// No model could be resolved for the requested metric or URI.
    #[error("no model found: {0}")]
    ModelNotFound(String),
    /// The model repository could not persist or load an artefact.
    #[error("model persistence failure: {0}")]
    Persistence(String),
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV decoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ValuationError {
    /// Single-message validation failure.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(vec![message.into()])
    }

    /// Wraps a black-box backend error, keeping its context chain.
    #[must_use]
    pub fn training(err: &anyhow::Error) -> Self {
        Self::Training(format!("{err:#}"))
    }

    /// Whether the failure is a rejected request rather than an infrastructure fault.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}
