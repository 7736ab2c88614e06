//!
//! Flock: operation-based CRDT entities that replicate over pluggable storage and transport.
//!
//! ## Core Concepts
//!
//! * **Operations (`operation::Operation`)**: The unit of replication. Every state transition of an
//!   entity is described by one operation, which has a compact text wire format and a deterministic
//!   continuation hash used to match acknowledgments.
//! * **Sources (`source::Source`)**: Storage collaborators that durably record operations and can
//!   replay an entity's history back into it.
//! * **Relays (`relay::Relay`)**: Transport collaborators that fan serialized operations out to
//!   connected peers and feed inbound operations back into the runtime.
//! * **Runtime (`engine::Runtime`)**: Owns the variant registry and the identity cache. There is at
//!   most one live entity per `(variant, id)` inside a runtime.
//! * **Entities (`engine::Entity`)**: A replicated value of some registered variant. Invoking a named
//!   operation runs its behavior, appends the operation to the log and the sources, broadcasts it to
//!   the relays and waits for the network to acknowledge it.
//! * **Replay**: When an operation arrives noticeably out of order the entity rebuilds its state by
//!   replaying its log sorted by time, so independent operations commute.

pub mod clock;
pub mod engine;
pub mod operation;
pub mod relay;
pub mod source;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::{ClockHold, FixedClock};
pub use engine::{
    Call, EngineConfig, Entity, EntityEvent, EntityOptions, Lifecycle, Origin, Outcome, Runtime,
    Variant, WeakRuntime,
};
pub use operation::Operation;
pub use relay::{PeerId, PeerLink, Relay, RelayStatus};
pub use source::Source;

/// Result type used throughout the Flock library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Flock library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured errors from the operation codec
    #[error(transparent)]
    Operation(operation::OperationError),

    /// Structured errors from storage sources
    #[error(transparent)]
    Source(source::SourceError),

    /// Structured errors from relays
    #[error(transparent)]
    Relay(relay::RelayError),

    /// Structured errors from the entity engine
    #[error(transparent)]
    Engine(engine::EngineError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Operation(_) => "operation",
            Error::Source(_) => "source",
            Error::Relay(_) => "relay",
            Error::Engine(_) => "engine",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error describes text that is not a valid operation.
    pub fn is_malformed_operation(&self) -> bool {
        match self {
            Error::Operation(op_err) => op_err.is_malformed(),
            _ => false,
        }
    }

    /// Check if this error was raised while validating an operation against an entity.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Operation(_) => true,
            Error::Engine(engine_err) => engine_err.is_validation_error(),
            _ => false,
        }
    }

    /// Check if this error indicates a name that is already registered.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Engine(engine_err) => engine_err.is_duplicate(),
            _ => false,
        }
    }

    /// Check if this error indicates a storage or transport backend cannot be reached.
    pub fn is_backend_unavailable(&self) -> bool {
        match self {
            Error::Source(source_err) => source_err.is_backend_unavailable(),
            Error::Relay(relay_err) => relay_err.is_backend_unavailable(),
            Error::Engine(engine_err) => engine_err
                .failures()
                .iter()
                .any(|failure| failure.is_backend_unavailable()),
            _ => false,
        }
    }

    /// Check if this error indicates a continuation was not acknowledged in time.
    pub fn is_timeout_error(&self) -> bool {
        match self {
            Error::Engine(engine_err) => {
                engine_err.is_timeout()
                    || engine_err
                        .failures()
                        .iter()
                        .any(|failure| failure.is_timeout_error())
            }
            _ => false,
        }
    }

    /// Check if this error is storage-related.
    pub fn is_source_error(&self) -> bool {
        matches!(self, Error::Source(_))
    }

    /// Check if this error is transport-related.
    pub fn is_relay_error(&self) -> bool {
        matches!(self, Error::Relay(_))
    }

    /// Check if this error is engine-related.
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Error::Engine(_))
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Source(source_err) => source_err.is_io_error(),
            Error::Relay(relay_err) => relay_err.is_io_error(),
            _ => false,
        }
    }
}
