//! Error types for bucket operations.

use crate::txn::TxnState;
use std::io;
use thiserror::Error;

/// Result type for bucket operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur during bucket and transaction operations.
///
/// Callers should classify errors with [`KvError::is_not_found`] and
/// [`KvError::is_cancellation`] rather than matching on backend-specific
/// variants. Anything that is neither is an opaque backend failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KvError {
    /// The key does not exist in the visible state (bucket or transaction overlay).
    #[error("key not found: {key:?}")]
    KeyNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The execution context was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// The execution context's deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The transaction was already committed or rolled back.
    #[error("transaction is {state}")]
    TxnClosed {
        /// The terminal state the transaction is in.
        state: TxnState,
    },

    /// The key cannot be stored by this backend.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// Another handle holds exclusive access to the bucket.
    #[error("bucket locked: another process has exclusive access")]
    Locked,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other backend failure, passed through unchanged.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl KvError {
    /// Creates a key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Wraps an opaque backend error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }

    /// Returns true if this is [`KvError::KeyNotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// Returns true if the error came from a cancelled or expired context.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
