use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use orchard_auth::{OwnerPair, check_permission_named};
use orchard_core::ProfileId;

use crate::app::routes::resolve_caller;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The caller's profile, role and membership, alongside what their token claims.
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let status = match services.engine.membership_status(profile.id).await {
        Ok(s) => s,
        Err(e) => return errors::service_error_to_response(e, services.expose_internal_errors),
    };

    Json(dto::MeResponse {
        profile_id: status.profile_id,
        external_id: caller.external_id().to_string(),
        app_role: status.app_role,
        claimed_role: caller.claimed_role(),
        claims_in_sync: caller.claimed_role() == status.app_role,
        membership_state: status.state,
        membership: status.membership,
    })
    .into_response()
}

/// Evaluate a named permission for the caller's stored role.
///
/// `resource_owner_id` supplies the ownership comparison for `:own`
/// permissions.
pub async fn check_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(query): Query<dto::PermissionCheckQuery>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let owner = match query.resource_owner_id.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<ProfileId>() {
            Ok(resource_owner_id) => Some(OwnerPair::new(profile.id, resource_owner_id)),
            Err(_) => return errors::invalid_id("profile"),
        },
    };

    Json(check_permission_named(&query.permission, profile.app_role, owner)).into_response()
}
