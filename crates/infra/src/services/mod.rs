//! Application services over [`crate::store::Store`] and
//! [`crate::claims::ClaimsStore`].
//!
//! Every state change commits in one transaction first; claims are
//! synchronized afterwards. A claims failure never undoes a committed change
//! and comes back to the caller as a [`ClaimsWarning`].

use serde::Serialize;
use std::time::Duration as StdDuration;
use thiserror::Error;

use orchard_auth::ExternalId;
use orchard_core::DomainError;

use crate::store::StoreError;

pub mod claims_sync;
pub mod engine;
pub mod lifecycle;
pub mod provisioner;
pub mod sweep;

pub use claims_sync::{ClaimsSyncError, ClaimsSynchronizer, Reconciled};
pub use engine::{ArchiveReport, ConsistencyEngine, MembershipStatus};
pub use provisioner::ProfileProvisioner;
pub use sweep::{ExpirySweeper, SweepReport};

/// Error taxonomy surfaced to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::Forbidden(msg) => ServiceError::Forbidden(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::Backend(msg) | StoreError::Fault(msg) => ServiceError::Internal(msg),
        }
    }
}

/// Claims could not be brought in line after a committed role change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimsWarning {
    pub external_id: ExternalId,
    pub message: String,
}

/// A committed result plus any non-fatal claims warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Committed<T> {
    pub value: T,
    pub claims_warnings: Vec<ClaimsWarning>,
}

impl<T> Committed<T> {
    pub fn new(value: T, claims_warnings: Vec<ClaimsWarning>) -> Self {
        Self { value, claims_warnings }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Committed<U> {
        Committed {
            value: f(self.value),
            claims_warnings: self.claims_warnings,
        }
    }
}

/// Tunables shared by the engine, the sweeper and the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Length of a purchased membership term.
    pub membership_term: chrono::Duration,
    /// Upper bound on profiles a single archive cascade may touch.
    pub max_cascade_profiles: usize,
    /// Profiles examined per expiry sweep.
    pub sweep_batch_size: usize,
    pub claims_retry_attempts: u32,
    pub claims_retry_backoff: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            membership_term: chrono::Duration::days(365),
            max_cascade_profiles: 500,
            sweep_batch_size: 200,
            claims_retry_attempts: 3,
            claims_retry_backoff: StdDuration::from_millis(100),
        }
    }
}

/// `base * 2^(attempt-1)`, capped at 30s.
pub(crate) fn backoff(base: StdDuration, attempt: u32) -> StdDuration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(StdDuration::from_secs(30))
}
