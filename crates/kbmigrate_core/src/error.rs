use thiserror::Error;

/// Failure kinds a caller may want to tell apart.
///
/// Everything else travels as a plain `anyhow::Error` with context attached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrateError {
    /// A paginated listing kept returning pages past the configured bound.
    #[error("pagination of {endpoint} exceeded {limit} pages")]
    PageLimitExceeded { endpoint: String, limit: usize },

    /// A write kept answering HTTP 429 after every permitted retry.
    #[error("rate limited by {endpoint} after {attempts} attempts")]
    RateLimited { endpoint: String, attempts: usize },

    #[error("{endpoint} answered HTTP {status}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    /// An input item is unusable; the item is skipped, the run continues.
    #[error("{0}")]
    Validation(String),

    #[error("missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),
}

impl MigrateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// True when `error` (or anything in its context chain) is a validation failure.
pub fn is_validation_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<MigrateError>())
        .any(|cause| matches!(cause, MigrateError::Validation(_)))
}
