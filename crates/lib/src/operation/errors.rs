//! Error types for the operation codec.

use thiserror::Error;

/// Errors raised while building or parsing an [`Operation`](super::Operation).
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OperationError {
    /// Wire text could not be split into its fields.
    #[error("Malformed operation: {reason}")]
    Malformed {
        /// What was missing or unreadable
        reason: String,
    },

    /// A name field contains one of the wire delimiters.
    #[error("Operation field {field} contains a reserved delimiter: {value:?}")]
    ReservedDelimiter {
        /// Which field was rejected
        field: &'static str,
        /// The offending value
        value: String,
    },

    /// The params fragment is not valid JSON.
    #[error("Malformed operation params")]
    InvalidParams {
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

impl OperationError {
    /// Check if the input could not be read as an operation at all.
    ///
    /// Reserved delimiters count as malformed: an operation carrying one could not
    /// survive a round trip through the wire format.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            OperationError::Malformed { .. }
                | OperationError::InvalidParams { .. }
                | OperationError::ReservedDelimiter { .. }
        )
    }

    /// Check if a name field was rejected.
    pub fn is_reserved_delimiter(&self) -> bool {
        matches!(self, OperationError::ReservedDelimiter { .. })
    }
}

impl From<OperationError> for crate::Error {
    fn from(err: OperationError) -> Self {
        crate::Error::Operation(err)
    }
}
