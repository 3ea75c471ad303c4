use logwide_api::{ApiError, ErrorKind, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Required setup is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A record lacks what the schema requires. Nothing was written.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("format error: {0}")]
    Format(String),

    /// Store failure, passed through unchanged.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// `Storage` and `Io` are returned untouched so store failures reach the
    /// caller exactly as reported.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Configuration(msg) => EngineError::Configuration(format!("{ctx}: {msg}")),
            EngineError::Validation(msg) => EngineError::Validation(format!("{ctx}: {msg}")),
            EngineError::Format(msg) => EngineError::Format(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

impl From<ApiError> for EngineError {
    fn from(e: ApiError) -> Self {
        match e.kind {
            ErrorKind::Config => EngineError::Configuration(e.message),
            ErrorKind::Validation => EngineError::Validation(e.message),
            ErrorKind::Format => EngineError::Format(e.message),
        }
    }
}
