//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: picks Postgres or in-memory storage and builds the
//!   provisioner, claims synchronizer, consistency engine and sweeper
//! - `routes/`: handlers grouped by resource
//! - `dto.rs`: wire shapes
//! - `errors.rs`: `ServiceError` to status + `{error, message}` body

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use secrecy::ExposeSecret;
use tower::ServiceBuilder;

use orchard_auth::{Hs256Jwt, JwtValidator};
use orchard_infra::StoreError;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> Result<(Router, Arc<AppServices>), StoreError> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((router(services.clone(), config), services))
}

/// Router over already-built services.
pub fn router(services: Arc<AppServices>, config: &AppConfig) -> Router {
    let jwt: Arc<dyn JwtValidator> = Arc::new(Hs256Jwt::new(config.jwt_secret.expose_secret().as_bytes()));
    let auth_state = middleware::AuthState {
        jwt,
        services: services.clone(),
    };

    // Everything except /health needs a bearer token and sees the services.
    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn_with_state(
                auth_state,
                middleware::auth_middleware,
            ))
            .layer(Extension(services)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
