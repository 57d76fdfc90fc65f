//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed / network / decode | N/A | `Backend` |
//!
//! ## Locking
//!
//! `profile_for_update` issues `SELECT ... FOR UPDATE`. Services lock every
//! profile whose membership they change, in ascending id order when a cascade
//! touches several, so concurrent cascades cannot deadlock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use orchard_auth::{AppRole, ExternalId};
use orchard_core::{Money, ProductId, ProfileId, PurchaseId};
use orchard_membership::{Membership, Profile};
use orchard_products::{Product, ProductType};
use orchard_purchasing::Purchase;

use super::{Store, StoreError, StoreTx};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const PROFILE_COLUMNS: &str = "id, external_id, app_role, created_at";
const PRODUCT_COLUMNS: &str = "id, name, product_type, price_cents, created_by, created_at, deleted_at";
const PURCHASE_COLUMNS: &str =
    "id, profile_id, product_id, quantity, total_cents, term_ends_at, created_at, deleted_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn profile(&mut self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("profile", e))?;
        row.as_ref().map(profile_from_row).transpose()
    }

    #[instrument(skip(self), fields(profile_id = %id), err)]
    async fn profile_for_update(&mut self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("profile_for_update", e))?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn profile_by_external_id(
        &mut self,
        external_id: &ExternalId,
    ) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE external_id = $1"
        ))
        .bind(external_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("profile_by_external_id", e))?;
        row.as_ref().map(profile_from_row).transpose()
    }

    #[instrument(skip(self, profile), fields(external_id = %profile.external_id), err)]
    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), StoreError> {
        // DO NOTHING keeps the transaction usable after losing the race.
        let result = sqlx::query(
            r#"
            INSERT INTO profiles (id, external_id, app_role, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(profile.id.as_uuid())
        .bind(profile.external_id.as_str())
        .bind(profile.app_role.as_str())
        .bind(profile.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_profile", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "profile for {} already exists",
                profile.external_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(profile_id = %id, role = %role), err)]
    async fn set_profile_role(&mut self, id: ProfileId, role: AppRole) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE profiles SET app_role = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(role.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_profile_role", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("profile {id}")));
        }
        Ok(())
    }

    async fn lapsed_member_ids(
        &mut self,
        now: DateTime<Utc>,
        after: Option<ProfileId>,
        limit: usize,
    ) -> Result<Vec<ProfileId>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT p.id
            FROM profiles p
            LEFT JOIN memberships m ON m.profile_id = p.id
            WHERE p.app_role = 'MEMBER'
              AND (m.id IS NULL OR (m.end_date IS NOT NULL AND m.end_date <= $1))
              AND ($2::uuid IS NULL OR p.id > $2)
            ORDER BY p.id ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(after.map(|id| *id.as_uuid()))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lapsed_member_ids", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(ProfileId::from_uuid)
                    .map_err(|e| map_sqlx_error("lapsed_member_ids", e))
            })
            .collect()
    }

    async fn membership(&mut self, profile_id: ProfileId) -> Result<Option<Membership>, StoreError> {
        let row = sqlx::query(
            "SELECT id, profile_id, start_date, end_date FROM memberships WHERE profile_id = $1",
        )
        .bind(profile_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("membership", e))?;
        row.as_ref().map(membership_from_row).transpose()
    }

    #[instrument(skip(self, membership), fields(profile_id = %membership.profile_id), err)]
    async fn upsert_membership(&mut self, membership: &Membership) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO memberships (id, profile_id, start_date, end_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (profile_id)
            DO UPDATE SET start_date = EXCLUDED.start_date, end_date = EXCLUDED.end_date
            "#,
        )
        .bind(membership.id.as_uuid())
        .bind(membership.profile_id.as_uuid())
        .bind(membership.start_date)
        .bind(membership.end_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_membership", e))?;
        Ok(())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn product_for_share(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR SHARE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product_for_share", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product_for_update", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, product_type, price_cents, created_by, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.product_type.as_str())
        .bind(product.price.cents())
        .bind(product.created_by.as_uuid())
        .bind(product.created_at)
        .bind(product.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn archive_product(&mut self, id: ProductId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE products SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("archive_product", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn list_products(&mut self, include_archived: bool) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE ($1 OR deleted_at IS NULL) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(include_archived)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    async fn purchase(&mut self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("purchase", e))?;
        row.as_ref().map(|r| purchase_from_row(r, "")).transpose()
    }

    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id), err)]
    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<(), StoreError> {
        let quantity = i32::try_from(purchase.quantity)
            .map_err(|_| StoreError::Backend(format!("quantity {} out of range", purchase.quantity)))?;
        sqlx::query(
            r#"
            INSERT INTO purchases
                (id, profile_id, product_id, quantity, total_cents, term_ends_at, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(purchase.id.as_uuid())
        .bind(purchase.profile_id.as_uuid())
        .bind(purchase.product_id.as_uuid())
        .bind(quantity)
        .bind(purchase.total.cents())
        .bind(purchase.term_ends_at)
        .bind(purchase.created_at)
        .bind(purchase.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(purchase_id = %id), err)]
    async fn cancel_purchase(&mut self, id: PurchaseId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE purchases SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("cancel_purchase", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("active purchase {id}")));
        }
        Ok(())
    }

    async fn active_purchases_for_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<Purchase>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE product_id = $1 AND deleted_at IS NULL \
             ORDER BY profile_id ASC, id ASC"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("active_purchases_for_product", e))?;
        rows.iter().map(|r| purchase_from_row(r, "")).collect()
    }

    async fn membership_purchases(
        &mut self,
        profile_id: ProfileId,
    ) -> Result<Vec<(Purchase, Product)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                pu.id AS pu_id,
                pu.profile_id AS pu_profile_id,
                pu.product_id AS pu_product_id,
                pu.quantity AS pu_quantity,
                pu.total_cents AS pu_total_cents,
                pu.term_ends_at AS pu_term_ends_at,
                pu.created_at AS pu_created_at,
                pu.deleted_at AS pu_deleted_at,
                pr.id, pr.name, pr.product_type, pr.price_cents,
                pr.created_by, pr.created_at, pr.deleted_at
            FROM purchases pu
            JOIN products pr ON pr.id = pu.product_id
            WHERE pu.profile_id = $1
              AND pu.deleted_at IS NULL
              AND pr.product_type = 'MEMBERSHIP'
            "#,
        )
        .bind(profile_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("membership_purchases", e))?;

        rows.iter()
            .map(|r| Ok((purchase_from_row(r, "pu_")?, product_from_row(r)?)))
            .collect()
    }

    async fn purchases(&mut self, profile_id: Option<ProfileId>) -> Result<Vec<Purchase>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE ($1::uuid IS NULL OR profile_id = $1) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(profile_id.map(Uuid::from))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("purchases", e))?;
        rows.iter().map(|r| purchase_from_row(r, "")).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn profile_from_row(row: &PgRow) -> Result<Profile, StoreError> {
    let decode = |e| map_sqlx_error("decode profile", e);
    let external_id: String = row.try_get("external_id").map_err(decode)?;
    let role: String = row.try_get("app_role").map_err(decode)?;
    Ok(Profile {
        id: ProfileId::from_uuid(row.try_get("id").map_err(decode)?),
        external_id: ExternalId::new(external_id)
            .map_err(|e| StoreError::Backend(format!("stored external id: {e}")))?,
        app_role: AppRole::parse(&role)
            .ok_or_else(|| StoreError::Backend(format!("stored role '{role}' is not recognised")))?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<Membership, StoreError> {
    let decode = |e| map_sqlx_error("decode membership", e);
    Ok(Membership {
        id: orchard_core::MembershipId::from_uuid(row.try_get("id").map_err(decode)?),
        profile_id: ProfileId::from_uuid(row.try_get("profile_id").map_err(decode)?),
        start_date: row.try_get("start_date").map_err(decode)?,
        end_date: row.try_get("end_date").map_err(decode)?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let decode = |e| map_sqlx_error("decode product", e);
    let product_type: String = row.try_get("product_type").map_err(decode)?;
    let price_cents: i64 = row.try_get("price_cents").map_err(decode)?;
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        product_type: ProductType::parse(&product_type).ok_or_else(|| {
            StoreError::Backend(format!("stored product type '{product_type}' is not recognised"))
        })?,
        price: Money::from_cents(price_cents).map_err(|e| StoreError::Backend(e.to_string()))?,
        created_by: ProfileId::from_uuid(row.try_get("created_by").map_err(decode)?),
        created_at: row.try_get("created_at").map_err(decode)?,
        deleted_at: row.try_get("deleted_at").map_err(decode)?,
    })
}

/// `prefix` selects aliased columns in joined queries.
fn purchase_from_row(row: &PgRow, prefix: &str) -> Result<Purchase, StoreError> {
    let decode = |e| map_sqlx_error("decode purchase", e);
    let col = |name: &str| format!("{prefix}{name}");
    let quantity: i32 = row.try_get(col("quantity").as_str()).map_err(decode)?;
    let total_cents: i64 = row.try_get(col("total_cents").as_str()).map_err(decode)?;
    Ok(Purchase {
        id: PurchaseId::from_uuid(row.try_get(col("id").as_str()).map_err(decode)?),
        profile_id: ProfileId::from_uuid(row.try_get(col("profile_id").as_str()).map_err(decode)?),
        product_id: ProductId::from_uuid(row.try_get(col("product_id").as_str()).map_err(decode)?),
        quantity: u32::try_from(quantity)
            .map_err(|_| StoreError::Backend(format!("stored quantity {quantity} is negative")))?,
        total: Money::from_cents(total_cents).map_err(|e| StoreError::Backend(e.to_string()))?,
        term_ends_at: row.try_get(col("term_ends_at").as_str()).map_err(decode)?,
        created_at: row.try_get(col("created_at").as_str()).map_err(decode)?,
        deleted_at: row.try_get(col("deleted_at").as_str()).map_err(decode)?,
    })
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
