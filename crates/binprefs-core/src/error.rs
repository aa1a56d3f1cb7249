//! Error types for binprefs operations
//!
//! Every failure inside the engine is a [`PrefsError`]. Errors travel as
//! [`PrefsResult`] up to the store facade, which is the one place that turns
//! them into "report to the error handler and return the caller's default".

use std::io;

use thiserror::Error;

use crate::codec::Kind;

/// binprefs error types with enough context to report without the call site
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrefsError {
    /// File store read/write/delete failed
    #[error("I/O error on {target}: {message} ({kind:?})")]
    Io {
        /// Key (or `<store>` for store-wide operations) being accessed
        target: String,
        /// The underlying I/O error kind
        kind: io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// No persisted record exists for the key
    #[error("no record for key {key:?}")]
    NotFound { key: String },

    /// Record is zero bytes long, so it has no type flag
    #[error("empty record")]
    EmptyRecord,

    /// Type flag is not registered with the codec registry
    #[error("unknown type flag 0x{flag:02x}")]
    UnknownFlag { flag: u8 },

    /// Record ends before its declared payload does
    #[error("truncated {kind} record: need {needed} bytes, have {available}")]
    Truncated {
        kind: Kind,
        needed: usize,
        available: usize,
    },

    /// Payload is complete but not a valid encoding of its kind
    #[error("malformed {kind} record: {reason}")]
    Malformed { kind: Kind, reason: String },

    /// On-disk framing around a record failed verification
    #[error("corrupt record file for {key:?}: {reason}")]
    CorruptFile { key: String, reason: String },

    /// Stored kind differs from the kind the caller asked for
    #[error("kind mismatch: requested {requested}, stored {stored}")]
    KindMismatch { requested: Kind, stored: Kind },

    /// Invalid configuration, including duplicate codec flags
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key cannot be persisted
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Value cannot be represented in its record format
    #[error("cannot encode {kind} value: {reason}")]
    Encode { kind: Kind, reason: String },

    /// A change listener panicked
    #[error("listener panicked while handling {key:?}: {message}")]
    Listener { key: String, message: String },

    /// Write executor no longer accepts work
    #[error("write executor is closed")]
    Closed,
}

/// Coarse classification used by error handlers to pick a severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Environmental storage failure
    Io,
    /// Record bytes could not be decoded
    Decode,
    /// Caller asked for the wrong kind
    KindMismatch,
    /// Store was built with an invalid configuration
    Configuration,
    /// Caller supplied a key or value the store cannot persist
    InvalidInput,
    /// Listener misbehaved
    Listener,
    /// Store is shutting down
    Closed,
}

impl PrefsError {
    /// Wrap an I/O error with the key and operation it happened on.
    pub fn io(target: impl Into<String>, context: &str, err: io::Error) -> Self {
        PrefsError::Io {
            target: target.into(),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }

    /// Shorthand for [`PrefsError::Malformed`].
    pub fn malformed(kind: Kind, reason: impl Into<String>) -> Self {
        PrefsError::Malformed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PrefsError::Io { .. } | PrefsError::NotFound { .. } => ErrorCategory::Io,
            PrefsError::EmptyRecord
            | PrefsError::UnknownFlag { .. }
            | PrefsError::Truncated { .. }
            | PrefsError::Malformed { .. }
            | PrefsError::CorruptFile { .. } => ErrorCategory::Decode,
            PrefsError::KindMismatch { .. } => ErrorCategory::KindMismatch,
            PrefsError::Configuration(_) => ErrorCategory::Configuration,
            PrefsError::InvalidKey { .. } | PrefsError::Encode { .. } => {
                ErrorCategory::InvalidInput
            }
            PrefsError::Listener { .. } => ErrorCategory::Listener,
            PrefsError::Closed => ErrorCategory::Closed,
        }
    }
}

impl From<io::Error> for PrefsError {
    fn from(err: io::Error) -> Self {
        PrefsError::io("<store>", "I/O failure", err)
    }
}

/// Result type alias for binprefs operations
pub type PrefsResult<T> = Result<T, PrefsError>;
