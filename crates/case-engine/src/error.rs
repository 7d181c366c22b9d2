//! Error types for the case engine.
//!
//! Callers see three domain failures (`NotFound`, `NotValid`, `NotAllowed`),
//! one transient failure (`Conflict`) raised by the persistence layer on an
//! optimistic-concurrency mismatch, and a handful of infrastructure errors.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A referenced id (execution, case instance, case definition, task)
    /// does not resolve to a live entity.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied input is structurally invalid.
    #[error("Not valid: {0}")]
    NotValid(String),

    /// The entity exists but the requested transition violates its guard.
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// The case instance was modified since it was read.
    #[error("Conflict: case instance '{case_instance_id}' was updated by another command (expected revision {expected}, found {actual})")]
    Conflict {
        case_instance_id: String,
        expected: u64,
        actual: u64,
    },

    /// Definition parse error (YAML, JSON)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by an external collaborator (process runtime).
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may simply retry the same command.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::NotValid(_) => "not_valid",
            EngineError::NotAllowed(_) => "not_allowed",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Parse(_) => "parse",
            EngineError::Serialization(_) => "serialization",
            EngineError::Config(_) => "config",
            EngineError::ExternalService(_) => "external_service",
            EngineError::Internal(_) => "internal",
        }
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}
