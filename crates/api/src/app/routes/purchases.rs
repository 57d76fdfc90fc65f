use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};

use orchard_core::PurchaseId;

use crate::app::routes::resolve_caller;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_own_purchases))
        .route("/:id/cancel", post(cancel_purchase))
}

/// The caller's purchases, cancelled ones included.
pub async fn list_own_purchases(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.purchases_for(profile.id).await {
        Ok(purchases) => {
            let items: Vec<dto::PurchaseResponse> = purchases.into_iter().map(Into::into).collect();
            Json(items).into_response()
        }
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}

pub async fn cancel_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let purchase_id: PurchaseId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::invalid_id("purchase"),
    };
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.cancel_purchase(purchase_id, profile.id).await {
        Ok(committed) => {
            Json(dto::CommittedResponse::<dto::PurchaseResponse>::from_committed(committed)).into_response()
        }
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}
