//! Error types for reactant-core

use thiserror::Error;

/// Core error type
///
/// Errors are `Clone` because a single action failure is observed by every
/// holder of the action's completion handle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown computation: {0}")]
    UnknownComputation(String),

    #[error("Computation '{name}' failed: {reason}")]
    ComputationFailed { name: String, reason: String },

    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("'{task}' was dropped before it completed")]
    ActionCancelled { task: String },

    #[error("'{task}' suspended but no executor is configured")]
    NoExecutor { task: String },

    #[error("Entity values have no identity field '{key}'")]
    MissingIdentity { key: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for an action body reporting its own failure
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ActionFailed {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a computation reporting its own failure
    pub fn computation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ComputationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
