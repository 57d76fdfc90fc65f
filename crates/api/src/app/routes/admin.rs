use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    response::IntoResponse,
    routing::{get, post},
};

use orchard_auth::{Permission, require};
use orchard_infra::ServiceError;

use crate::app::routes::resolve_caller;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/purchases", get(list_all_purchases))
        .route("/memberships/sweep", post(sweep_memberships))
}

pub async fn list_all_purchases(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.all_purchases(profile.id).await {
        Ok(purchases) => {
            let items: Vec<dto::PurchaseResponse> = purchases.into_iter().map(Into::into).collect();
            Json(items).into_response()
        }
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}

/// Run one expiry sweep now instead of waiting for the scheduled pass.
pub async fn sweep_memberships(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    if let Err(e) = require(Permission::MembershipsManage, profile.app_role, None) {
        return errors::service_error_to_response(ServiceError::from(e), services.expose_internal_errors);
    }

    match services.sweeper.sweep_expire().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}
