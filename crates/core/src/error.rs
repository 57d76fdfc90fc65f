//! Errors raised by domain rules, before any storage is involved.

use thiserror::Error;

/// A rule refused the operation.
///
/// Each variant maps onto one caller-facing outcome; the service layer
/// converts without inspecting the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input: bad name, negative price, quantity out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Absent, or soft-deleted and therefore treated as absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Valid input that the current state does not allow, e.g. archiving a
    /// product that still has active purchases.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Permission decision denied the caller's role.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}
