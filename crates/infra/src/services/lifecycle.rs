//! Lifecycle transitions applied inside an open transaction.
//!
//! The caller must already hold the profile lock (`profile_for_update`).

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use orchard_membership::{Profile, Transition, cancel, expire, grant};

use crate::store::{StoreError, StoreTx};

use super::ServiceError;

/// Latest term end among the profile's purchases that still back a membership.
pub(crate) async fn backing_until(
    tx: &mut dyn StoreTx,
    profile: &Profile,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    Ok(tx
        .membership_purchases(profile.id)
        .await?
        .iter()
        .filter(|(purchase, product)| purchase.backs_membership(product, now))
        .filter_map(|(purchase, _)| purchase.term_ends_at)
        .max())
}

pub(crate) async fn grant_in(
    tx: &mut dyn StoreTx,
    profile: &Profile,
    term: Duration,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    let current = tx.membership(profile.id).await?;
    let transition = grant(profile, current.as_ref(), term, now)?;
    persist(tx, &transition).await?;
    Ok(transition)
}

/// Run after the backing purchase has been cancelled in the same transaction.
pub(crate) async fn cancel_in(
    tx: &mut dyn StoreTx,
    profile: &Profile,
    now: DateTime<Utc>,
) -> Result<Transition, ServiceError> {
    let current = tx.membership(profile.id).await?;
    let backing = backing_until(tx, profile, now).await?;
    let transition = cancel(profile, current.as_ref(), backing, now);
    persist(tx, &transition).await?;
    Ok(transition)
}

pub(crate) async fn expire_in(
    tx: &mut dyn StoreTx,
    profile: &Profile,
    now: DateTime<Utc>,
) -> Result<Option<Transition>, ServiceError> {
    let current = tx.membership(profile.id).await?;
    let backing = backing_until(tx, profile, now).await?;
    let Some(transition) = expire(profile, current.as_ref(), backing, now) else {
        return Ok(None);
    };
    persist(tx, &transition).await?;
    Ok(Some(transition))
}

async fn persist(tx: &mut dyn StoreTx, transition: &Transition) -> Result<(), StoreError> {
    if let Some(membership) = &transition.membership {
        tx.upsert_membership(membership).await?;
    }
    if transition.role_changed() {
        tx.set_profile_role(transition.profile_id, transition.role).await?;
    }
    info!(
        profile_id = %transition.profile_id,
        from = %transition.from,
        to = %transition.to,
        role = %transition.role,
        "membership transition"
    );
    Ok(())
}
