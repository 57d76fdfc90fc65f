//! Periodic expiry: downgrades MEMBERs whose term has run out.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use orchard_core::{Clock, ProfileId};
use orchard_membership::Transition;

use crate::claims::ClaimsStore;
use crate::store::Store;

use super::lifecycle::expire_in;
use super::{ClaimsSynchronizer, ClaimsWarning, EngineConfig, ServiceError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// MEMBER → USER transitions committed by this pass.
    pub downgraded_count: usize,
    /// Lapsed rows re-extended from another backing purchase.
    pub repaired_count: usize,
    /// Profiles whose transaction failed; retried on the next pass.
    pub failed_count: usize,
    pub claims_warnings: Vec<ClaimsWarning>,
}

#[derive(Clone)]
pub struct ExpirySweeper<S, C> {
    store: S,
    sync: ClaimsSynchronizer<S, C>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl<S, C> ExpirySweeper<S, C>
where
    S: Store,
    C: ClaimsStore,
{
    pub fn new(store: S, sync: ClaimsSynchronizer<S, C>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            store,
            sync,
            clock,
            batch_size: config.sweep_batch_size.max(1),
        }
    }

    /// One pass over every lapsed member, read a page of `batch_size` ids at
    /// a time.
    ///
    /// Each profile commits in its own transaction, so a failure on one does
    /// not hold back the rest. Pages continue after the last id seen, so
    /// profiles that keep failing are not re-read within the same pass.
    /// Re-running with nothing lapsed is a no-op.
    #[instrument(skip(self), err)]
    pub async fn sweep_expire(&self) -> Result<SweepReport, ServiceError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut after: Option<ProfileId> = None;

        loop {
            let page = {
                let mut tx = self.store.begin().await?;
                tx.lapsed_member_ids(now, after, self.batch_size).await?
            };
            let Some(last) = page.last().copied() else {
                break;
            };
            after = Some(last);

            for profile_id in page {
                match self.expire_one(profile_id, now).await {
                    Ok(Some((external_id, transition))) => {
                        if transition.is_downgrade() {
                            report.downgraded_count += 1;
                        } else {
                            report.repaired_count += 1;
                        }
                        if transition.role_changed() {
                            report
                                .claims_warnings
                                .extend(self.sync.after_role_change(&external_id).await);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(%profile_id, error = %e, "expiry failed for profile");
                        report.failed_count += 1;
                    }
                }
            }
        }

        info!(
            downgraded = report.downgraded_count,
            repaired = report.repaired_count,
            failed = report.failed_count,
            "expiry sweep finished"
        );
        Ok(report)
    }

    async fn expire_one(
        &self,
        profile_id: ProfileId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<(orchard_auth::ExternalId, Transition)>, ServiceError> {
        let mut tx = self.store.begin().await?;
        // Re-read under lock; the candidate list may be stale.
        let Some(profile) = tx.profile_for_update(profile_id).await? else {
            return Ok(None);
        };
        let Some(transition) = expire_in(tx.as_mut(), &profile, now).await? else {
            return Ok(None);
        };
        tx.commit().await?;
        Ok(Some((profile.external_id, transition)))
    }
}
