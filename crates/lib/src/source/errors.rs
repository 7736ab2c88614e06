//! Error types for storage sources.

use thiserror::Error;

/// Errors raised by [`Source`](super::Source) implementations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SourceError {
    /// The storage backend is closed or could not be reached.
    #[error("Source {source_name} unavailable: {reason}")]
    BackendUnavailable {
        /// Name of the source
        source_name: String,
        /// Why it is unavailable
        reason: String,
    },

    /// Serialization failed.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// Deserialization failed.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A stored row could not be turned back into an operation.
    #[error("Corrupt stored operation: {reason}")]
    CorruptOperation {
        /// What was wrong with the row
        reason: String,
    },

    /// The operation holds a value the backend cannot store faithfully.
    #[error("Source {source_name} cannot store {field} {value}")]
    OutOfRange {
        /// Name of the source
        source_name: String,
        /// The offending field
        field: &'static str,
        /// Its value
        value: String,
    },

    /// SQL database error from sqlx.
    #[cfg(feature = "sqlite")]
    #[error("SQL error: {reason}")]
    SqlxError {
        /// Context and message
        reason: String,
        /// The underlying sqlx error
        #[source]
        source: Option<sqlx::Error>,
    },
}

impl SourceError {
    /// Check if the backend could not be reached.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, SourceError::BackendUnavailable { .. })
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, SourceError::FileIo { .. })
    }

    /// Check if an operation was refused because a field does not fit the backend.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, SourceError::OutOfRange { .. })
    }

    /// Check if stored data could not be read back.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            SourceError::DeserializationFailed { .. } | SourceError::CorruptOperation { .. }
        )
    }
}

impl From<SourceError> for crate::Error {
    fn from(err: SourceError) -> Self {
        crate::Error::Source(err)
    }
}
