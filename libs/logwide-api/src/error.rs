use std::fmt;

/// Error kind for record, schema and template failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required setup is missing (schema, timestamp column, parser).
    Config,
    /// A record does not carry what the schema requires.
    Validation,
    /// Malformed schema spec, timestamp or structured text, or a template
    /// operation the environment cannot perform.
    Format,
}

/// Error returned by the record model and the schema mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Validation, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

// ---------------------------------------------------------------------------
// From impls: parse errors → ApiError::Format
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

impl From<chrono::ParseError> for ApiError {
    fn from(e: chrono::ParseError) -> Self {
        Self::format(e.to_string())
    }
}

impl From<uuid::Error> for ApiError {
    fn from(e: uuid::Error) -> Self {
        Self::format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = ApiError::validation("no field 'host'").with_context("event 7");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "event 7: no field 'host'");
    }

    #[test]
    fn json_errors_are_format_errors() {
        let err: ApiError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Format);
    }
}
