//! Error types
//!
//! Errors returned by the mixing core. Lookups that miss are recoverable and
//! reported as a status; allocation and configuration failures abort the
//! operation that caused them; a hub whose collaborators failed to start
//! answers every call with [`Error::NotReady`].
//!
//! Transient per-frame conditions (a frame evicted from a full slot queue, a
//! missed composition tick) are never errors.

use crate::mixer::SourceId;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mixer operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source is not registered with the hub
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    /// The slot is not occupied
    #[error("unknown slot: {0}")]
    UnknownSlot(usize),

    /// The source already occupies a slot
    #[error("source already registered: {0}")]
    SourceAlreadyRegistered(SourceId),

    /// A buffer, sink adapter or slot could not be allocated
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// A processing element rejected its configuration
    #[error("element '{element}' rejected configuration: {reason}")]
    Configuration {
        /// Name of the element (or collaborator) that rejected the config
        element: String,
        /// Why the configuration was rejected
        reason: String,
    },

    /// The hub (or one of its collaborators) failed to initialize
    #[error("mixer not ready: {0}")]
    NotReady(String),

    /// Invalid processing-element graph operation
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A media buffer did not match its declared format
    #[error("malformed media: {0}")]
    Malformed(String),

    /// I/O error from an element's underlying stream
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error for the named element
    pub fn configuration(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            element: element.into(),
            reason: reason.into(),
        }
    }

    /// Integer status for callers that only understand primitive results.
    ///
    /// Always negative so it can share a return channel with slot indices.
    pub fn code(&self) -> i32 {
        match self {
            Error::UnknownSource(_) | Error::UnknownSlot(_) => -1,
            Error::SourceAlreadyRegistered(_) => -2,
            Error::Allocation(_) => -3,
            Error::Configuration { .. } => -4,
            Error::NotReady(_) => -5,
            Error::Pipeline(_) => -6,
            Error::Io(_) => -7,
            Error::Malformed(_) => -8,
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::UnknownSource(_) | Error::UnknownSlot(_))
    }
}
