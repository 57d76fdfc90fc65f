//! Pushes the database role into the identity provider's claims.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use orchard_auth::{AppRole, ExternalId};

use crate::claims::{ClaimsError, ClaimsStore};
use crate::store::{Store, StoreError};

use super::{ClaimsWarning, EngineConfig, backoff};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsSyncError {
    #[error("no profile for {0}")]
    ProfileMissing(ExternalId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciled {
    pub role: AppRole,
    /// Role the claims resolved to before reconciling.
    pub claimed: AppRole,
    pub changed: bool,
}

#[derive(Clone)]
pub struct ClaimsSynchronizer<S, C> {
    store: S,
    claims: C,
    retry_attempts: u32,
    retry_backoff: std::time::Duration,
}

impl<S: Store, C: ClaimsStore> ClaimsSynchronizer<S, C> {
    pub fn new(store: S, claims: C, config: &EngineConfig) -> Self {
        Self {
            store,
            claims,
            retry_attempts: config.claims_retry_attempts.max(1),
            retry_backoff: config.claims_retry_backoff,
        }
    }

    pub fn claims(&self) -> &C {
        &self.claims
    }

    pub async fn force_refresh(&self, identity: &ExternalId) -> Result<(), ClaimsError> {
        self.claims.force_refresh(identity).await
    }

    /// Make the claim equal the database role, retrying claims failures with
    /// exponential backoff. A missing or unrecognised claim counts as USER.
    pub async fn reconcile(&self, identity: &ExternalId) -> Result<Reconciled, ClaimsSyncError> {
        let role = {
            let mut tx = self.store.begin().await?;
            tx.profile_by_external_id(identity)
                .await?
                .ok_or_else(|| ClaimsSyncError::ProfileMissing(identity.clone()))?
                .app_role
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reconcile_once(identity, role).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.retry_attempts => {
                    let delay = backoff(self.retry_backoff, attempt);
                    warn!(external_id = %identity, attempt, error = %e, ?delay, "claims reconcile failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn reconcile_once(&self, identity: &ExternalId, role: AppRole) -> Result<Reconciled, ClaimsError> {
        let raw = self.claims.current_role(identity).await?;
        let claimed = AppRole::from_claim(raw.as_deref());
        // A stale unrecognised value is rewritten even if it resolves to USER.
        let exact = raw.as_deref() == Some(role.as_str());
        if exact {
            return Ok(Reconciled {
                role,
                claimed,
                changed: false,
            });
        }

        self.claims.write_role(identity, role).await?;
        self.claims.force_refresh(identity).await?;
        info!(external_id = %identity, from = %claimed, to = %role, "role claim reconciled");
        Ok(Reconciled {
            role,
            claimed,
            changed: true,
        })
    }

    /// Best-effort follow-up to a committed role change.
    pub async fn after_role_change(&self, identity: &ExternalId) -> Option<ClaimsWarning> {
        let mut problems = Vec::new();
        if let Err(e) = self.force_refresh(identity).await {
            problems.push(format!("refresh failed: {e}"));
        }
        if let Err(e) = self.reconcile(identity).await {
            problems.push(format!("reconcile failed: {e}"));
        }

        if problems.is_empty() {
            return None;
        }
        let message = problems.join("; ");
        warn!(external_id = %identity, %message, "claims left out of sync after role change");
        Some(ClaimsWarning {
            external_id: identity.clone(),
            message,
        })
    }
}
