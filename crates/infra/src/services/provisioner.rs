use std::sync::Arc;
use tracing::{debug, info, warn};

use orchard_auth::ExternalId;
use orchard_core::Clock;
use orchard_membership::Profile;

use crate::store::{Store, StoreError};

use super::ServiceError;

/// Creates the profile row on first sight of an external identity.
#[derive(Clone)]
pub struct ProfileProvisioner<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: Store> ProfileProvisioner<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Idempotent: concurrent first requests for one identity end with a
    /// single profile, and every caller gets that row.
    pub async fn ensure_profile(&self, identity: &ExternalId) -> Result<Profile, ServiceError> {
        let mut tx = self.store.begin().await?;
        if let Some(existing) = tx.profile_by_external_id(identity).await? {
            return Ok(existing);
        }

        let profile = Profile::provision(identity.clone(), self.clock.now());
        match tx.insert_profile(&profile).await {
            Ok(()) => {
                tx.commit().await?;
                info!(external_id = %identity, profile_id = %profile.id, "profile provisioned");
                Ok(profile)
            }
            Err(StoreError::Conflict(_)) => {
                drop(tx);
                debug!(external_id = %identity, "lost provisioning race; re-reading");
                let mut tx = self.store.begin().await?;
                tx.profile_by_external_id(identity)
                    .await?
                    .ok_or_else(|| ServiceError::Internal(format!("profile for {identity} vanished")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Request-path variant: a failure is logged and the request continues
    /// without a profile instead of being rejected.
    pub async fn ensure_profile_fail_open(&self, identity: &ExternalId) -> Option<Profile> {
        match self.ensure_profile(identity).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(external_id = %identity, error = %e, "profile provisioning failed; continuing without profile");
                None
            }
        }
    }
}
