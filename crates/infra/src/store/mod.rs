//! Transactional persistence for profiles, memberships, products and purchases.
//!
//! Every multi-row change the services make runs inside one [`StoreTx`].
//! A transaction that is dropped without [`StoreTx::commit`] rolls back, so an
//! early `?` return leaves storage untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use orchard_auth::{AppRole, ExternalId};
use orchard_core::{ProductId, ProfileId, PurchaseId};
use orchard_membership::{Membership, Profile};
use orchard_products::Product;
use orchard_purchasing::Purchase;

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryStore, RowLock};
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint hit, typically a concurrent insert of the same key.
    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),

    /// Injected failure (tests).
    #[error("injected store fault: {0}")]
    Fault(String),
}

/// Opens transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        (**self).begin().await
    }
}

/// One unit of work.
///
/// `*_for_update` reads lock the row until commit or rollback; the services
/// take the profile lock before touching that profile's membership.
#[async_trait]
pub trait StoreTx: Send {
    // --- profiles ---

    async fn profile(&mut self, id: ProfileId) -> Result<Option<Profile>, StoreError>;

    async fn profile_for_update(&mut self, id: ProfileId) -> Result<Option<Profile>, StoreError>;

    async fn profile_by_external_id(
        &mut self,
        external_id: &ExternalId,
    ) -> Result<Option<Profile>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the external id is taken.
    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), StoreError>;

    async fn set_profile_role(&mut self, id: ProfileId, role: AppRole) -> Result<(), StoreError>;

    /// MEMBER profiles whose membership row is missing or ended at or before
    /// `now`, ordered by id and starting strictly after `after`.
    async fn lapsed_member_ids(
        &mut self,
        now: DateTime<Utc>,
        after: Option<ProfileId>,
        limit: usize,
    ) -> Result<Vec<ProfileId>, StoreError>;

    // --- memberships ---

    async fn membership(&mut self, profile_id: ProfileId) -> Result<Option<Membership>, StoreError>;

    /// Insert or replace the single row for `membership.profile_id`.
    async fn upsert_membership(&mut self, membership: &Membership) -> Result<(), StoreError>;

    // --- products ---

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Shared lock: blocks archiving until commit, not other purchases.
    async fn product_for_share(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Exclusive lock, taken by archive before any profile lock.
    async fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Set `deleted_at`. Fails with [`StoreError::NotFound`] if the product is
    /// missing or already archived.
    async fn archive_product(&mut self, id: ProductId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_products(&mut self, include_archived: bool) -> Result<Vec<Product>, StoreError>;

    // --- purchases ---

    async fn purchase(&mut self, id: PurchaseId) -> Result<Option<Purchase>, StoreError>;

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<(), StoreError>;

    /// Set `deleted_at`. Fails with [`StoreError::NotFound`] if the purchase is
    /// missing or already cancelled.
    async fn cancel_purchase(&mut self, id: PurchaseId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn active_purchases_for_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<Purchase>, StoreError>;

    /// Active purchases of MEMBERSHIP-typed products held by `profile_id`,
    /// with their product (archived or not).
    async fn membership_purchases(
        &mut self,
        profile_id: ProfileId,
    ) -> Result<Vec<(Purchase, Product)>, StoreError>;

    /// Newest first. `None` lists every profile's purchases.
    async fn purchases(&mut self, profile_id: Option<ProfileId>) -> Result<Vec<Purchase>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
