//! Error types for the entity engine.

use thiserror::Error;

/// Errors raised by the runtime, variants and entities.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// A variant with this name is already registered.
    #[error("Variant {name} already exists")]
    DuplicateVariant {
        /// The variant name
        name: String,
    },

    /// No variant with this name is registered.
    #[error("Variant {name} is not registered")]
    UnknownVariant {
        /// The variant name
        name: String,
    },

    /// The operation name is already defined on the variant, possibly inherited.
    #[error("Operation {name} already exists on {variant}")]
    DuplicateOperation {
        /// The variant name
        variant: String,
        /// The operation name
        name: String,
    },

    /// The operation name is reserved or cannot be written on the wire.
    #[error("{name:?} is not a valid operation name")]
    ReservedOperationName {
        /// The rejected name
        name: String,
    },

    /// The operation cannot be handled by this entity.
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Why it was rejected
        reason: String,
    },

    /// The operation addresses a different entity.
    #[error("Mismatched operation {field}: expected {expected}, got {actual}")]
    MismatchedOperation {
        /// `type` or `id`
        field: &'static str,
        /// Value on the entity
        expected: String,
        /// Value on the operation
        actual: String,
    },

    /// No acknowledgment arrived before the continuation window closed.
    #[error("Continuation {hash} timed out after {timeout_ms}ms")]
    ContinuationTimeout {
        /// Continuation hash of the operation
        hash: String,
        /// The window that elapsed
        timeout_ms: u64,
    },

    /// The continuation was dropped before it resolved.
    #[error("Continuation {hash} was cancelled")]
    ContinuationCancelled {
        /// Continuation hash of the operation
        hash: String,
    },

    /// An operation behavior failed.
    #[error("Behavior {method} failed: {reason}")]
    Behavior {
        /// The operation name
        method: String,
        /// The failure reported by the behavior
        reason: String,
    },

    /// More than one step of a dispatch failed.
    #[error("Dispatch of {method} failed with {} errors", .failures.len())]
    DispatchFailed {
        /// The operation name
        method: String,
        /// Every failure, in the order the steps ran
        failures: Vec<crate::Error>,
    },
}

impl EngineError {
    /// Check if a name collided with an existing registration.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateVariant { .. } | EngineError::DuplicateOperation { .. }
        )
    }

    /// Check if an operation was rejected before it was applied.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidOperation { .. }
                | EngineError::MismatchedOperation { .. }
                | EngineError::ReservedOperationName { .. }
                | EngineError::UnknownVariant { .. }
        )
    }

    /// Check if a continuation timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::ContinuationTimeout { .. })
    }

    /// Check if a behavior reported a failure.
    pub fn is_behavior_error(&self) -> bool {
        matches!(self, EngineError::Behavior { .. })
    }

    /// Individual failures of an aggregated dispatch error, empty otherwise.
    pub fn failures(&self) -> &[crate::Error] {
        match self {
            EngineError::DispatchFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<EngineError> for crate::Error {
    fn from(err: EngineError) -> Self {
        crate::Error::Engine(err)
    }
}
