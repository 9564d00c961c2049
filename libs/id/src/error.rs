//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("identifier cannot be empty")]
    Empty,

    /// The input is not a security identifier.
    #[error("invalid SID '{input}': {reason}")]
    InvalidSid { input: String, reason: &'static str },

    /// The input is not a GUID.
    #[error("invalid GUID '{0}'")]
    InvalidGuid(String),

    /// The input is not a distinguished name.
    #[error("invalid DN '{input}': {reason}")]
    InvalidDn { input: String, reason: &'static str },

    /// An extended DN component (`<SID=...>`, `<GUID=...>`) is malformed.
    #[error("invalid extended DN component '{0}'")]
    InvalidExtendedComponent(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    pub(crate) fn sid(input: &str, reason: &'static str) -> Self {
        IdError::InvalidSid {
            input: input.to_string(),
            reason,
        }
    }

    pub(crate) fn dn(input: &str, reason: &'static str) -> Self {
        IdError::InvalidDn {
            input: input.to_string(),
            reason,
        }
    }
}
