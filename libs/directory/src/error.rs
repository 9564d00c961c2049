//! Directory error types.

use dirsam_id::IdError;
use dirsam_ridalloc::RidPoolError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Zero matches where exactly one was expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// A reference matched more than one object.
    #[error("{reference} is ambiguous: matches {}", matches.join("; "))]
    AmbiguousReference {
        reference: String,
        matches: Vec<String>,
    },

    /// Malformed reference or disallowed category.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The object to be created already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No RID is available in this server's pools.
    #[error("RID pool exhausted: {0}")]
    PoolExhausted(String),

    /// Stored RID pool attributes violate their invariants. Never repaired
    /// automatically.
    #[error("corrupt RID pool state: {0}")]
    CorruptPoolState(String),

    /// Transaction misuse.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Failure reported by the store, passed through unchanged.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

impl DirectoryError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DirectoryError::Store(e) if e.is_retryable())
    }
}

impl From<IdError> for DirectoryError {
    fn from(err: IdError) -> Self {
        DirectoryError::InvalidArgument(err.to_string())
    }
}

impl From<RidPoolError> for DirectoryError {
    fn from(err: RidPoolError) -> Self {
        match err {
            RidPoolError::PoolExhausted { .. } => DirectoryError::PoolExhausted(err.to_string()),
            RidPoolError::CorruptPoolState(reason) => DirectoryError::CorruptPoolState(reason),
            RidPoolError::InvalidPoolSize => DirectoryError::InvalidArgument(err.to_string()),
        }
    }
}
