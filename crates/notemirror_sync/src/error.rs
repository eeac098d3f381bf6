//! Error types for the sync engine.

use notemirror_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Remote implementations map their failures onto the first five variants;
/// the engine decides from the variant whether to retry, skip or abort.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient network failure. Retried with exponential backoff.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The remote returned a payload that could not be decoded.
    /// Retried immediately a small number of times.
    #[error("bad payload from remote: {message}")]
    PayloadDecode {
        /// Error message.
        message: String,
    },

    /// The remote refused a single entity permanently.
    #[error("remote fault: {message}")]
    RemoteFault {
        /// Error message.
        message: String,
    },

    /// The remote is throttling this account.
    #[error("rate limit reached, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the remote asked to wait.
        retry_after_secs: u64,
    },

    /// The requested object no longer exists or is no longer shared.
    #[error("not found: {0}")]
    NotFound(String),

    /// The database mirrors a different account.
    #[error("database belongs to '{local}' but the remote account is '{remote}'")]
    OwnerMismatch {
        /// Owner recorded in the database.
        local: String,
        /// Identity of the authenticated remote account.
        remote: String,
    },

    /// The database has no recorded owner.
    #[error("database is not initialized, no owner recorded")]
    NotInitialized,

    /// The remote violated the sync protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A download worker could not be started or died.
    #[error("worker failure: {0}")]
    Worker(String),
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a payload decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::PayloadDecode {
            message: message.into(),
        }
    }

    /// Creates a remote fault.
    pub fn remote_fault(message: impl Into<String>) -> Self {
        Self::RemoteFault {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }

    /// Returns true if a content download failing with this error should
    /// only skip the note it was fetching.
    pub fn is_per_note(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteFault { .. } | SyncError::NotFound(_) | SyncError::PayloadDecode { .. }
        )
    }

    /// Returns true if this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        !self.is_per_note()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection reset").is_retryable());
        assert!(!SyncError::decode("truncated").is_retryable());
        assert!(!SyncError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn fatal_errors() {
        assert!(SyncError::RateLimited { retry_after_secs: 5 }.is_fatal());
        assert!(SyncError::Protocol("bad".into()).is_fatal());
        assert!(SyncError::Cancelled.is_fatal());
        assert!(!SyncError::remote_fault("gone").is_fatal());
        assert!(!SyncError::NotFound("note".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SyncError::OwnerMismatch {
            local: "alice".into(),
            remote: "bob".into(),
        };
        assert!(err.to_string().contains("alice"));
        assert!(err.to_string().contains("bob"));
    }
}
