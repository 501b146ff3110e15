//! Creation-time error types
//!
//! Everything here is raised while building a definition: JSON decoding,
//! path/expression parsing, and whole-definition validation. Failures
//! during execution use `stateline_types::StateError` instead.

/// Errors raised while parsing or validating a definition
#[derive(Debug, thiserror::Error)]
pub enum DslError {
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unexpected token: expected {expected}, found '{found}'")]
    UnexpectedToken { expected: String, found: String },

    #[error("Unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    #[error("Invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("Invalid timestamp '{0}': expected an ISO-8601 date-time with 'T' separator and timezone")]
    InvalidTimestamp(String),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown intrinsic function: '{0}'")]
    UnknownIntrinsic(String),

    #[error("Validation error in state '{state}': {message}")]
    StateValidation { state: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Definition is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DslError {
    /// Shorthand for a state-scoped validation failure.
    pub fn in_state(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateValidation {
            state: state.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for definition-time operations
pub type DslResult<T> = Result<T, DslError>;
