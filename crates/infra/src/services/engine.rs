//! Purchase and soft-delete consistency engine.
//!
//! Keeps `Profile.app_role`, the membership row and purchases of MEMBERSHIP
//! products consistent under purchase, cancellation and product archival.
//! Each operation is one transaction; claims sync runs only after commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use orchard_auth::{AppRole, OwnerPair, Permission, check_permission, require};
use orchard_core::{Clock, ProductId, ProfileId, PurchaseId};
use orchard_membership::{Membership, MembershipState, Profile, Transition};
use orchard_products::{NewProduct, Product};
use orchard_purchasing::Purchase;

use crate::claims::ClaimsStore;
use crate::store::{Store, StoreTx};

use super::lifecycle::{backing_until, cancel_in, grant_in};
use super::{ClaimsSynchronizer, ClaimsWarning, Committed, EngineConfig, ServiceError};

/// Result of archiving a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub product: Product,
    pub cancelled_purchases: usize,
    pub downgraded_profiles: usize,
}

/// A profile's membership as of now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipStatus {
    pub profile_id: ProfileId,
    pub app_role: AppRole,
    pub state: MembershipState,
    pub membership: Option<Membership>,
}

#[derive(Clone)]
pub struct ConsistencyEngine<S, C> {
    store: S,
    sync: ClaimsSynchronizer<S, C>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S, C> ConsistencyEngine<S, C>
where
    S: Store + Clone,
    C: ClaimsStore,
{
    pub fn new(store: S, sync: ClaimsSynchronizer<S, C>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            sync,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[instrument(skip(self, input), fields(caller = %caller, product_type = %input.product_type), err)]
    pub async fn create_product(&self, caller: ProfileId, input: NewProduct) -> Result<Product, ServiceError> {
        let mut tx = self.store.begin().await?;
        let profile = load_caller(tx.as_mut(), caller).await?;
        let product = Product::create(input, profile.id, profile.app_role, self.clock.now())?;
        tx.insert_product(&product).await?;
        tx.commit().await?;

        info!(product_id = %product.id, name = %product.name, "product created");
        Ok(product)
    }

    /// Active catalog as `caller` may see it.
    pub async fn list_products(&self, caller: ProfileId) -> Result<Vec<Product>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let profile = load_caller(tx.as_mut(), caller).await?;
        let products = tx.list_products(false).await?;
        Ok(products
            .into_iter()
            .filter(|p| p.visible_to(profile.app_role))
            .collect())
    }

    pub async fn product(&self, caller: ProfileId, product_id: ProductId) -> Result<Product, ServiceError> {
        let mut tx = self.store.begin().await?;
        let profile = load_caller(tx.as_mut(), caller).await?;
        let product = tx
            .product(product_id)
            .await?
            .filter(|p| !p.is_archived())
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;
        if !product.visible_to(profile.app_role) {
            return Err(ServiceError::Forbidden(format!(
                "{} products are only available to members",
                product.product_type
            )));
        }
        Ok(product)
    }

    /// Buy `quantity` of a product. Buying a MEMBERSHIP starts a term and
    /// makes a USER a MEMBER in the same transaction.
    #[instrument(skip(self), fields(profile_id = %profile_id, product_id = %product_id), err)]
    pub async fn purchase(
        &self,
        profile_id: ProfileId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Committed<Purchase>, ServiceError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        // Product before profile, the same order archive takes them in.
        let product = tx
            .product_for_share(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;
        let profile = lock_caller(tx.as_mut(), profile_id).await?;
        product.ensure_purchasable(profile.app_role)?;

        let purchase = Purchase::place(profile.id, &product, quantity, self.config.membership_term, now)?;

        let mut transition = None;
        if product.is_membership() {
            if let Some(until) = backing_until(tx.as_mut(), &profile, now).await? {
                return Err(ServiceError::Conflict(format!(
                    "membership is already active until {}",
                    until.to_rfc3339()
                )));
            }
            tx.insert_purchase(&purchase).await?;
            transition = Some(grant_in(tx.as_mut(), &profile, self.config.membership_term, now).await?);
        } else {
            tx.insert_purchase(&purchase).await?;
        }
        tx.commit().await?;

        info!(
            purchase_id = %purchase.id,
            quantity = purchase.quantity,
            total = %purchase.total,
            "purchase recorded"
        );
        let warnings = self.sync_after(&profile, transition.as_slice()).await;
        Ok(Committed::new(purchase, warnings))
    }

    /// Soft-cancel a purchase. Cancelling a membership purchase ends the term
    /// unless another purchase still backs it.
    #[instrument(skip(self), fields(purchase_id = %purchase_id, caller = %caller), err)]
    pub async fn cancel_purchase(
        &self,
        purchase_id: PurchaseId,
        caller: ProfileId,
    ) -> Result<Committed<Purchase>, ServiceError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let caller = load_caller(tx.as_mut(), caller).await?;

        let mut purchase = tx
            .purchase(purchase_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("purchase {purchase_id}")))?;
        authorize_purchase_cancel(&caller, &purchase)?;

        let owner = tx.profile_for_update(purchase.profile_id).await?.ok_or_else(|| {
            ServiceError::Internal(format!("purchase {purchase_id} has no owning profile"))
        })?;

        purchase.cancel(now)?;
        tx.cancel_purchase(purchase.id, now).await?;

        let product = tx.product(purchase.product_id).await?.ok_or_else(|| {
            ServiceError::Internal(format!("purchase {purchase_id} references a missing product"))
        })?;

        let mut transition = None;
        if product.is_membership() {
            transition = Some(cancel_in(tx.as_mut(), &owner, now).await?);
        }
        tx.commit().await?;

        info!(owner = %owner.id, product_id = %product.id, "purchase cancelled");
        let warnings = self.sync_after(&owner, transition.as_slice()).await;
        Ok(Committed::new(purchase, warnings))
    }

    /// Cancel the caller's membership purchases that still back a term.
    #[instrument(skip(self), fields(caller = %caller), err)]
    pub async fn cancel_membership(&self, caller: ProfileId) -> Result<Committed<Vec<Purchase>>, ServiceError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let profile = lock_caller(tx.as_mut(), caller).await?;
        require(
            Permission::MembershipsCancelOwn,
            profile.app_role,
            Some(OwnerPair::new(profile.id, profile.id)),
        )?;

        let mut cancelled: Vec<Purchase> = tx
            .membership_purchases(profile.id)
            .await?
            .into_iter()
            .filter(|(purchase, product)| purchase.backs_membership(product, now))
            .map(|(purchase, _)| purchase)
            .collect();
        if cancelled.is_empty() {
            return Err(ServiceError::Conflict("no active membership to cancel".to_string()));
        }

        for purchase in &mut cancelled {
            purchase.cancel(now)?;
            tx.cancel_purchase(purchase.id, now).await?;
        }
        let transition = cancel_in(tx.as_mut(), &profile, now).await?;
        tx.commit().await?;

        info!(profile_id = %profile.id, cancelled = cancelled.len(), "membership cancelled");
        let warnings = self.sync_after(&profile, &[transition]).await;
        Ok(Committed::new(cancelled, warnings))
    }

    /// Archive a product.
    ///
    /// A product with active purchases cannot be archived, except a MEMBERSHIP
    /// product: its purchases are cancelled and every affected subscriber is
    /// downgraded (unless otherwise backed) before the product is marked
    /// archived. All of it commits together or not at all.
    #[instrument(skip(self), fields(product_id = %product_id, caller = %caller), err)]
    pub async fn archive_product(
        &self,
        product_id: ProductId,
        caller: ProfileId,
    ) -> Result<Committed<ArchiveReport>, ServiceError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let caller = load_caller(tx.as_mut(), caller).await?;

        let mut product = tx
            .product_for_update(product_id)
            .await?
            .filter(|p| !p.is_archived())
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;
        product.authorize_archive(caller.id, caller.app_role)?;

        let active = tx.active_purchases_for_product(product.id).await?;
        if !active.is_empty() && !product.is_membership() {
            return Err(ServiceError::Conflict(format!(
                "cannot archive '{}' while it has {} active purchase(s)",
                product.name,
                active.len()
            )));
        }

        let subscribers: BTreeSet<ProfileId> = active.iter().map(|p| p.profile_id).collect();
        if subscribers.len() > self.config.max_cascade_profiles {
            return Err(ServiceError::Conflict(format!(
                "archiving '{}' would affect {} profiles; the limit is {}",
                product.name,
                subscribers.len(),
                self.config.max_cascade_profiles
            )));
        }

        let transitions = cascade(tx.as_mut(), &active, &subscribers, now).await?;

        product.archive(now)?;
        tx.archive_product(product.id, now).await?;
        tx.commit().await?;

        let downgraded_profiles = transitions.iter().filter(|(_, t)| t.is_downgrade()).count();
        info!(
            name = %product.name,
            cancelled_purchases = active.len(),
            downgraded_profiles,
            "product archived"
        );

        let mut warnings = Vec::new();
        for (profile, transition) in &transitions {
            warnings.extend(self.sync_after(profile, std::slice::from_ref(transition)).await);
        }

        Ok(Committed::new(
            ArchiveReport {
                product,
                cancelled_purchases: active.len(),
                downgraded_profiles,
            },
            warnings,
        ))
    }

    /// Purchases owned by `caller`, newest first.
    pub async fn purchases_for(&self, caller: ProfileId) -> Result<Vec<Purchase>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let profile = load_caller(tx.as_mut(), caller).await?;
        Ok(tx.purchases(Some(profile.id)).await?)
    }

    /// Every purchase. Needs `access:admin`.
    pub async fn all_purchases(&self, caller: ProfileId) -> Result<Vec<Purchase>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let profile = load_caller(tx.as_mut(), caller).await?;
        require(Permission::AccessAdmin, profile.app_role, None)?;
        Ok(tx.purchases(None).await?)
    }

    pub async fn membership_status(&self, profile_id: ProfileId) -> Result<MembershipStatus, ServiceError> {
        let mut tx = self.store.begin().await?;
        let profile = load_caller(tx.as_mut(), profile_id).await?;
        let membership = tx.membership(profile.id).await?;
        Ok(MembershipStatus {
            profile_id: profile.id,
            app_role: profile.app_role,
            state: MembershipState::of(membership.as_ref(), self.clock.now()),
            membership,
        })
    }

    async fn sync_after(&self, profile: &Profile, transitions: &[Transition]) -> Vec<ClaimsWarning> {
        let mut warnings = Vec::new();
        if transitions.iter().any(Transition::role_changed) {
            warnings.extend(self.sync.after_role_change(&profile.external_id).await);
        }
        warnings
    }
}

/// Cancel `purchases` and settle each subscriber's membership.
///
/// Profiles are locked in ascending id order.
async fn cascade(
    tx: &mut dyn StoreTx,
    purchases: &[Purchase],
    subscribers: &BTreeSet<ProfileId>,
    now: DateTime<Utc>,
) -> Result<Vec<(Profile, Transition)>, ServiceError> {
    for purchase in purchases {
        tx.cancel_purchase(purchase.id, now).await?;
    }

    let mut transitions = Vec::with_capacity(subscribers.len());
    for &profile_id in subscribers {
        let Some(profile) = tx.profile_for_update(profile_id).await? else {
            warn!(%profile_id, "subscriber profile missing during cascade");
            continue;
        };
        let transition = cancel_in(tx, &profile, now).await?;
        transitions.push((profile, transition));
    }
    Ok(transitions)
}

async fn load_caller(tx: &mut dyn StoreTx, id: ProfileId) -> Result<Profile, ServiceError> {
    tx.profile(id).await?.ok_or(ServiceError::Unauthorized)
}

async fn lock_caller(tx: &mut dyn StoreTx, id: ProfileId) -> Result<Profile, ServiceError> {
    tx.profile_for_update(id).await?.ok_or(ServiceError::Unauthorized)
}

/// Owners need `purchases:cancel:own`; anyone else needs `purchases:cancel:any`.
fn authorize_purchase_cancel(caller: &Profile, purchase: &Purchase) -> Result<(), ServiceError> {
    let own = check_permission(
        Permission::PurchasesCancelOwn,
        caller.app_role,
        Some(OwnerPair::new(caller.id, purchase.profile_id)),
    );
    if own.allowed {
        return Ok(());
    }
    require(Permission::PurchasesCancelAny, caller.app_role, None)?;
    Ok(())
}
