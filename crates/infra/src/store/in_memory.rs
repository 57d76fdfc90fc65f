use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

use orchard_auth::{AppRole, ExternalId};
use orchard_core::{ProductId, ProfileId, PurchaseId, SoftDelete};
use orchard_membership::{Membership, Profile};
use orchard_products::Product;
use orchard_purchasing::Purchase;

use super::{Store, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    profiles: BTreeMap<ProfileId, Profile>,
    memberships: BTreeMap<ProfileId, Membership>,
    products: BTreeMap<ProductId, Product>,
    purchases: BTreeMap<PurchaseId, Purchase>,
}

/// A row lock taken by a transaction, in the order it was requested.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RowLock {
    Profile(ProfileId),
    ProductShared(ProductId),
    ProductExclusive(ProductId),
}

#[derive(Debug, Default)]
struct Hooks {
    /// Role writes allowed before the next one fails.
    role_writes_left: std::sync::Mutex<Option<usize>>,
    role_writes: AtomicUsize,
    row_locks: std::sync::Mutex<Vec<RowLock>>,
}

/// In-memory store with serializable transactions.
///
/// Intended for tests/dev. A transaction holds the whole-store lock and works
/// on a copy of the tables; commit swaps the copy in, drop discards it.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    hooks: Arc<Hooks>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the role update after the next `n` successful ones fail with
    /// [`StoreError::Fault`]. One-shot.
    pub fn fail_role_update_after(&self, n: usize) {
        if let Ok(mut left) = self.hooks.role_writes_left.lock() {
            *left = Some(n);
        }
    }

    /// Successful role writes so far.
    pub fn role_writes(&self) -> usize {
        self.hooks.role_writes.load(Ordering::SeqCst)
    }

    /// Drain the row locks requested since the last call. Rolled-back
    /// transactions are included.
    pub fn take_row_locks(&self) -> Vec<RowLock> {
        self.hooks
            .row_locks
            .lock()
            .map(|mut locks| std::mem::take(&mut *locks))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            work,
            hooks: self.hooks.clone(),
        }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    hooks: Arc<Hooks>,
}

impl InMemoryTx {
    // Every transaction already holds the store lock; this only records the
    // order a row-locking backend would see.
    fn note_lock(&self, lock: RowLock) {
        if let Ok(mut locks) = self.hooks.row_locks.lock() {
            locks.push(lock);
        }
    }

    fn trip_role_fault(&self) -> Result<(), StoreError> {
        let mut left = self
            .hooks
            .role_writes_left
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        match left.as_mut() {
            Some(0) => {
                *left = None;
                Err(StoreError::Fault("role update rejected".to_string()))
            }
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn profile(&mut self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        Ok(self.work.profiles.get(&id).cloned())
    }

    async fn profile_for_update(&mut self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        self.note_lock(RowLock::Profile(id));
        self.profile(id).await
    }

    async fn profile_by_external_id(
        &mut self,
        external_id: &ExternalId,
    ) -> Result<Option<Profile>, StoreError> {
        Ok(self
            .work
            .profiles
            .values()
            .find(|p| &p.external_id == external_id)
            .cloned())
    }

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), StoreError> {
        if self.work.profiles.values().any(|p| p.external_id == profile.external_id) {
            return Err(StoreError::Conflict(format!(
                "profile for {} already exists",
                profile.external_id
            )));
        }
        if self.work.profiles.contains_key(&profile.id) {
            return Err(StoreError::Conflict(format!("profile {} already exists", profile.id)));
        }
        self.work.profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn set_profile_role(&mut self, id: ProfileId, role: AppRole) -> Result<(), StoreError> {
        self.trip_role_fault()?;
        let profile = self
            .work
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {id}")))?;
        profile.app_role = role;
        self.hooks.role_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lapsed_member_ids(
        &mut self,
        now: DateTime<Utc>,
        after: Option<ProfileId>,
        limit: usize,
    ) -> Result<Vec<ProfileId>, StoreError> {
        let start = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(self
            .work
            .profiles
            .range((start, Bound::Unbounded))
            .map(|(_, p)| p)
            .filter(|p| p.app_role == AppRole::Member)
            .filter(|p| {
                self.work
                    .memberships
                    .get(&p.id)
                    .is_none_or(|m| !m.is_active_at(now))
            })
            .map(|p| p.id)
            .take(limit)
            .collect())
    }

    async fn membership(&mut self, profile_id: ProfileId) -> Result<Option<Membership>, StoreError> {
        Ok(self.work.memberships.get(&profile_id).cloned())
    }

    async fn upsert_membership(&mut self, membership: &Membership) -> Result<(), StoreError> {
        if !self.work.profiles.contains_key(&membership.profile_id) {
            return Err(StoreError::NotFound(format!("profile {}", membership.profile_id)));
        }
        self.work
            .memberships
            .insert(membership.profile_id, membership.clone());
        Ok(())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn product_for_share(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.note_lock(RowLock::ProductShared(id));
        self.product(id).await
    }

    async fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.note_lock(RowLock::ProductExclusive(id));
        self.product(id).await
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.work.products.contains_key(&product.id) {
            return Err(StoreError::Conflict(format!("product {} already exists", product.id)));
        }
        self.work.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn archive_product(&mut self, id: ProductId, at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.work.products.get_mut(&id) {
            Some(p) if !p.is_deleted() => {
                p.deleted_at = Some(at);
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("product {id}"))),
        }
    }

    async fn list_products(&mut self, include_archived: bool) -> Result<Vec<Product>, StoreError> {
        let mut products: Vec<Product> = self
            .work
            .products
            .values()
            .filter(|p| include_archived || !p.is_deleted())
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(products)
    }

    async fn purchase(&mut self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        Ok(self.work.purchases.get(&id).cloned())
    }

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<(), StoreError> {
        if !self.work.profiles.contains_key(&purchase.profile_id) {
            return Err(StoreError::NotFound(format!("profile {}", purchase.profile_id)));
        }
        if !self.work.products.contains_key(&purchase.product_id) {
            return Err(StoreError::NotFound(format!("product {}", purchase.product_id)));
        }
        if self.work.purchases.contains_key(&purchase.id) {
            return Err(StoreError::Conflict(format!("purchase {} already exists", purchase.id)));
        }
        self.work.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn cancel_purchase(&mut self, id: PurchaseId, at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.work.purchases.get_mut(&id) {
            Some(p) if p.is_active() => {
                p.deleted_at = Some(at);
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("active purchase {id}"))),
        }
    }

    async fn active_purchases_for_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<Purchase>, StoreError> {
        Ok(self
            .work
            .purchases
            .values()
            .filter(|p| p.product_id == product_id && p.is_active())
            .cloned()
            .collect())
    }

    async fn membership_purchases(
        &mut self,
        profile_id: ProfileId,
    ) -> Result<Vec<(Purchase, Product)>, StoreError> {
        Ok(self
            .work
            .purchases
            .values()
            .filter(|p| p.profile_id == profile_id && p.is_active())
            .filter_map(|p| {
                self.work
                    .products
                    .get(&p.product_id)
                    .filter(|product| product.is_membership())
                    .map(|product| (p.clone(), product.clone()))
            })
            .collect())
    }

    async fn purchases(&mut self, profile_id: Option<ProfileId>) -> Result<Vec<Purchase>, StoreError> {
        let mut purchases: Vec<Purchase> = self
            .work
            .purchases
            .values()
            .filter(|p| profile_id.is_none_or(|id| p.profile_id == id))
            .cloned()
            .collect();
        purchases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(purchases)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use orchard_core::MembershipId;

    fn profile(sub: &str) -> Profile {
        Profile::provision(ExternalId::new(sub).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn uncommitted_work_is_discarded() {
        let store = InMemoryStore::new();
        let p = profile("idp|a");

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_profile(&p).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.profile(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn external_id_is_unique() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_profile(&profile("idp|a")).await.unwrap();
        let err = tx.insert_profile(&profile("idp|a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn lapsed_members_are_listed_in_id_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let mut ids = Vec::new();
        for sub in ["idp|1", "idp|2", "idp|3"] {
            let p = Profile {
                app_role: AppRole::Member,
                ..profile(sub)
            };
            tx.insert_profile(&p).await.unwrap();
            ids.push(p.id);
        }
        // The middle one is still within its term.
        tx.upsert_membership(&Membership {
            id: MembershipId::new(),
            profile_id: ids[1],
            start_date: now,
            end_date: Some(now + Duration::days(1)),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut expected = vec![ids[0], ids[2]];
        expected.sort();
        assert_eq!(tx.lapsed_member_ids(now, None, 10).await.unwrap(), expected);
        assert_eq!(tx.lapsed_member_ids(now, None, 1).await.unwrap(), vec![expected[0]]);
        assert_eq!(
            tx.lapsed_member_ids(now, Some(expected[0]), 10).await.unwrap(),
            vec![expected[1]]
        );
        assert!(tx.lapsed_member_ids(now, Some(expected[1]), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn role_fault_fires_once() {
        let store = InMemoryStore::new();
        let p = profile("idp|a");
        let mut tx = store.begin().await.unwrap();
        tx.insert_profile(&p).await.unwrap();

        store.fail_role_update_after(1);
        tx.set_profile_role(p.id, AppRole::Member).await.unwrap();
        assert!(matches!(
            tx.set_profile_role(p.id, AppRole::User).await,
            Err(StoreError::Fault(_))
        ));
        tx.set_profile_role(p.id, AppRole::User).await.unwrap();
        assert_eq!(store.role_writes(), 2);
    }
}
