use axum::{
    Router,
    routing::{get, post},
};

use orchard_membership::Profile;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::CallerContext;

pub mod admin;
pub mod claims;
pub mod memberships;
pub mod products;
pub mod purchases;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/me", get(system::me))
        .route("/permissions/check", get(system::check_permission))
        .nest("/products", products::router())
        .nest("/purchases", purchases::router())
        .route("/memberships/cancel", post(memberships::cancel_own))
        .nest("/claims", claims::router())
        .nest("/admin", admin::router())
}

/// Current profile for the caller.
///
/// Reuses the profile the auth middleware read for this request. When
/// fail-open provisioning there did not produce one, this retries strictly
/// and surfaces the error.
pub async fn resolve_caller(
    services: &AppServices,
    caller: &CallerContext,
) -> Result<Profile, axum::response::Response> {
    if let Some(profile) = caller.profile() {
        return Ok(profile.clone());
    }
    services
        .provisioner
        .ensure_profile(caller.external_id())
        .await
        .map_err(|e| errors::service_error_to_response(e, services.expose_internal_errors))
}
