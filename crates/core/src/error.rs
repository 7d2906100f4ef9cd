use thiserror::Error;

use crate::entity::UpdateState;

/// Every failure an update entity can report.
///
/// Errors are `Clone` because the runtime records the last one on the
/// entity (where operators see it) and also returns it to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpdateError {
    /// Structurally invalid declaration or unresolvable action identifier.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The expression failed to parse or evaluate.
    #[error("Template error: {0}")]
    Template(String),

    /// The expression referenced a variable or entity that does not exist.
    #[error("Undefined reference: {0}")]
    UndefinedReference(String),

    /// The action executor rejected or failed the call.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The operation is forbidden by entity policy (e.g. skip with auto_update).
    #[error("Operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// The entity lacks the configuration the operation needs.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The operation is not valid in the entity's current state.
    #[error("Cannot {operation} while entity is {state}")]
    InvalidState {
        operation: &'static str,
        state: UpdateState,
    },
}

impl UpdateError {
    /// Short stable label for log fields and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Configuration(_) => "configuration",
            UpdateError::Template(_) => "template",
            UpdateError::UndefinedReference(_) => "undefined_reference",
            UpdateError::Dispatch(_) => "dispatch",
            UpdateError::OperationNotAllowed(_) => "operation_not_allowed",
            UpdateError::UnsupportedOperation(_) => "unsupported_operation",
            UpdateError::InvalidState { .. } => "invalid_state",
        }
    }

    /// Whether this error came out of template evaluation.
    pub fn is_evaluation(&self) -> bool {
        matches!(
            self,
            UpdateError::Template(_) | UpdateError::UndefinedReference(_)
        )
    }
}

/// Result alias used across the template-update crates.
pub type Result<T> = std::result::Result<T, UpdateError>;
