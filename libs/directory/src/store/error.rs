//! Store error types.

use thiserror::Error;

/// Errors reported by a directory store backend.
///
/// These pass through the directory core unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed object does not exist.
    #[error("no such object: {0}")]
    NoSuchObject(String),

    /// An object with the same DN, GUID or SID already exists.
    #[error("entry already exists: {0}")]
    EntryAlreadyExists(String),

    /// An added attribute value is already present.
    #[error("attribute or value exists: {attribute} on {target}")]
    AttributeOrValueExists { target: String, attribute: String },

    /// A deleted attribute or value is not present.
    #[error("no such attribute: {attribute} on {target}")]
    NoSuchAttribute { target: String, attribute: String },

    /// The object still has children.
    #[error("not allowed on non-leaf: {0}")]
    NotAllowedOnNonLeaf(String),

    /// The write would break a store-enforced rule.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction begin/commit/cancel called out of order.
    #[error("transaction error: {0}")]
    Transaction(&'static str),

    /// Another writer holds the store; the caller may retry.
    #[error("store busy: {0}")]
    Busy(String),

    /// SQLite backend error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored attributes could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored identifier failed to parse.
    #[error("corrupt stored identifier: {0}")]
    Identifier(#[from] dirsam_id::IdError),
}

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}
