use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use orchard_auth::RoleClaims;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/reconcile", post(reconcile))
        .route("/refresh", post(refresh))
}

/// Rewrite the caller's role claim from the stored role.
pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    match services.sync.reconcile(caller.external_id()).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::claims_sync_error_to_response(e, services.expose_internal_errors),
    }
}

/// Reconcile, then hand back a token carrying the current role so the
/// client does not have to wait for its identity provider to re-issue.
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let outcome = match services.sync.reconcile(caller.external_id()).await {
        Ok(o) => o,
        Err(e) => return errors::claims_sync_error_to_response(e, services.expose_internal_errors),
    };

    let now = services.clock.now();
    let claims = RoleClaims::new(caller.external_id().clone(), Some(outcome.role), now, services.token_ttl);
    let token = match services.issuer.issue(&claims) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to sign refreshed token");
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "could not issue token",
            );
        }
    };

    Json(dto::TokenResponse {
        token,
        app_role: outcome.role,
        expires_at: now + services.token_ttl,
        changed: outcome.changed,
    })
    .into_response()
}
