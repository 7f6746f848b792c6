use std::fmt;
use std::io;
use thiserror::Error;

/// Fatal errors. Expected validation and policy failures are reported through
/// [`crate::core::engine::TransitionOutcome`] instead.
#[derive(Error, Debug)]
pub enum GantryError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(
        "State document version {found} is newer than supported version {supported}; refusing to load"
    )]
    ForwardIncompatibleVersion { found: String, supported: String },
    #[error("Migration error: {0}")]
    MigrationError(String),
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("Lock error: {0}")]
    LockError(String),
}

/// Caller-facing codes for recoverable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownPacket,
    ActorMismatch,
    InvalidAction,
    DependencyUnsatisfied,
    InvalidTransition,
    PolicyDenied,
}

impl ErrorCode {
    /// Stable code string, `None` for policy denials (surfaced verbatim).
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ErrorCode::UnknownPacket | ErrorCode::ActorMismatch => Some("E-001"),
            ErrorCode::InvalidAction => Some("E-002"),
            ErrorCode::DependencyUnsatisfied => Some("E-003"),
            ErrorCode::InvalidTransition => Some("E-004"),
            ErrorCode::PolicyDenied => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::UnknownPacket => "UnknownPacket",
            ErrorCode::ActorMismatch => "ActorMismatch",
            ErrorCode::InvalidAction => "InvalidAction",
            ErrorCode::DependencyUnsatisfied => "DependencyUnsatisfied",
            ErrorCode::InvalidTransition => "InvalidTransition",
            ErrorCode::PolicyDenied => "PolicyDenied",
        }
    }

    /// Render a failure message: `E-004 InvalidTransition: <detail>`.
    pub fn message(&self, detail: impl fmt::Display) -> String {
        match self.code() {
            Some(code) => format!("{} {}: {}", code, self.name(), detail),
            None => detail.to_string(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} {}", code, self.name()),
            None => f.write_str(self.name()),
        }
    }
}
