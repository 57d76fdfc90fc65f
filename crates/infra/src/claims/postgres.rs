//! Claims kept in the `role_claims` table, read by the token issuer.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use orchard_auth::{AppRole, ExternalId};

use super::{ClaimsError, ClaimsStore};

#[derive(Debug, Clone)]
pub struct PostgresClaimsStore {
    pool: Arc<PgPool>,
}

impl PostgresClaimsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl ClaimsStore for PostgresClaimsStore {
    async fn current_role(&self, identity: &ExternalId) -> Result<Option<String>, ClaimsError> {
        let row = sqlx::query("SELECT app_role FROM role_claims WHERE external_id = $1")
            .bind(identity.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_claims_error("current_role", e))?;
        match row {
            Some(row) => row
                .try_get::<Option<String>, _>("app_role")
                .map_err(|e| map_claims_error("current_role", e)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(external_id = %identity, role = %role), err)]
    async fn write_role(&self, identity: &ExternalId, role: AppRole) -> Result<(), ClaimsError> {
        sqlx::query(
            r#"
            INSERT INTO role_claims (external_id, app_role)
            VALUES ($1, $2)
            ON CONFLICT (external_id) DO UPDATE SET app_role = EXCLUDED.app_role
            "#,
        )
        .bind(identity.as_str())
        .bind(role.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_claims_error("write_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(external_id = %identity), err)]
    async fn force_refresh(&self, identity: &ExternalId) -> Result<(), ClaimsError> {
        sqlx::query(
            r#"
            INSERT INTO role_claims (external_id, refreshed_at, refresh_count)
            VALUES ($1, now(), 1)
            ON CONFLICT (external_id)
            DO UPDATE SET refreshed_at = now(), refresh_count = role_claims.refresh_count + 1
            "#,
        )
        .bind(identity.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_claims_error("force_refresh", e))?;
        Ok(())
    }
}

fn map_claims_error(operation: &str, err: sqlx::Error) -> ClaimsError {
    match err {
        sqlx::Error::Database(db_err) => {
            ClaimsError::Rejected(format!("database error in {}: {}", operation, db_err.message()))
        }
        _ => ClaimsError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
