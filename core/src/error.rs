//! Core error types and utilities

use schema::ErrorKind;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("A background process named '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("No background process named '{name}'")]
    NotFound { name: String },

    #[error("Failed to spawn process: {0}")]
    SpawnFailure(String),

    #[error("Process failed: {0}")]
    RuntimeFailure(String),

    #[error("Command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to persist output: {0}")]
    PersistenceFailure(String),

    #[error("Failed to signal process: {0}")]
    ProcessSignal(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AlreadyRunning { .. } => "CORE001",
            CoreError::NotFound { .. } => "CORE002",
            CoreError::SpawnFailure(_) => "CORE003",
            CoreError::RuntimeFailure(_) => "CORE004",
            CoreError::Timeout { .. } => "CORE005",
            CoreError::PersistenceFailure(_) => "CORE006",
            CoreError::ProcessSignal(_) => "CORE007",
            CoreError::ConfigurationError(_) => "CORE008",
            CoreError::ValidationError(_) => "CORE009",
            CoreError::IoError(_) => "CORE010",
            CoreError::SerializationError(_) => "CORE011",
        }
    }

    /// Caller-visible failure category
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::SpawnFailure(_) => ErrorKind::SpawnFailure,
            CoreError::RuntimeFailure(_) | CoreError::ProcessSignal(_) => ErrorKind::RuntimeFailure,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            CoreError::ConfigurationError(_) | CoreError::ValidationError(_) => {
                ErrorKind::InvalidRequest
            }
            CoreError::IoError(_) | CoreError::SerializationError(_) => ErrorKind::Internal,
        }
    }

    /// Convert into the generic failure payload returned to callers
    pub fn to_report(&self) -> schema::ErrorReport {
        schema::ErrorReport::new(self.kind(), self.to_string())
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
