//! Role claims held by the identity provider.
//!
//! Tokens carry `app_role` as a claim. The database role is authoritative;
//! claims are a cache the synchronizer pushes the database value into.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use orchard_auth::{AppRole, ExternalId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{ClaimRecord, InMemoryClaimsStore};
pub use postgres::PostgresClaimsStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("claims store unavailable: {0}")]
    Unavailable(String),

    #[error("claims store rejected the write: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ClaimsStore: Send + Sync {
    /// Raw `app_role` claim currently issued for `identity`, if any.
    async fn current_role(&self, identity: &ExternalId) -> Result<Option<String>, ClaimsError>;

    async fn write_role(&self, identity: &ExternalId, role: AppRole) -> Result<(), ClaimsError>;

    /// Invalidate cached tokens so the next one is minted from fresh claims.
    async fn force_refresh(&self, identity: &ExternalId) -> Result<(), ClaimsError>;
}

#[async_trait]
impl<C> ClaimsStore for Arc<C>
where
    C: ClaimsStore + ?Sized,
{
    async fn current_role(&self, identity: &ExternalId) -> Result<Option<String>, ClaimsError> {
        (**self).current_role(identity).await
    }

    async fn write_role(&self, identity: &ExternalId, role: AppRole) -> Result<(), ClaimsError> {
        (**self).write_role(identity, role).await
    }

    async fn force_refresh(&self, identity: &ExternalId) -> Result<(), ClaimsError> {
        (**self).force_refresh(identity).await
    }
}
