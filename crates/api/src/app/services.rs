//! Infrastructure wiring: store, claims store, and the services over them.

use std::sync::Arc;

use secrecy::ExposeSecret;

use orchard_auth::Hs256Jwt;
use orchard_core::{Clock, SystemClock};
use orchard_infra::{
    ClaimsStore, ClaimsSynchronizer, ConsistencyEngine, ExpirySweeper, InMemoryClaimsStore, InMemoryStore,
    PostgresClaimsStore, PostgresStore, ProfileProvisioner, Store, StoreError,
};

use crate::config::AppConfig;

pub type DynStore = Arc<dyn Store>;
pub type DynClaims = Arc<dyn ClaimsStore>;

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub provisioner: ProfileProvisioner<DynStore>,
    pub sync: ClaimsSynchronizer<DynStore, DynClaims>,
    pub engine: ConsistencyEngine<DynStore, DynClaims>,
    pub sweeper: Arc<ExpirySweeper<DynStore, DynClaims>>,
    /// Mints refreshed tokens.
    pub issuer: Hs256Jwt,
    pub token_ttl: chrono::Duration,
    pub clock: Arc<dyn Clock>,
    pub expose_internal_errors: bool,
}

impl AppServices {
    pub fn new(store: DynStore, claims: DynClaims, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        let sync = ClaimsSynchronizer::new(store.clone(), claims, &config.engine);
        Self {
            provisioner: ProfileProvisioner::new(store.clone(), clock.clone()),
            engine: ConsistencyEngine::new(store.clone(), sync.clone(), clock.clone(), config.engine.clone()),
            sweeper: Arc::new(ExpirySweeper::new(store, sync.clone(), clock.clone(), &config.engine)),
            sync,
            issuer: Hs256Jwt::new(config.jwt_secret.expose_secret().as_bytes()),
            token_ttl: config.token_ttl,
            clock,
            expose_internal_errors: config.expose_internal_errors,
        }
    }
}

/// Postgres when `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url.expose_secret(), 10).await?;
            store.migrate().await?;
            let claims = PostgresClaimsStore::new(store.pool().clone());
            tracing::info!("using postgres store");
            Ok(AppServices::new(Arc::new(store), Arc::new(claims), clock, config))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (state is lost on restart)");
            Ok(AppServices::new(
                Arc::new(InMemoryStore::new()),
                Arc::new(InMemoryClaimsStore::new()),
                clock,
                config,
            ))
        }
    }
}
