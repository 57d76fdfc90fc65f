use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use crate::app::routes::resolve_caller;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

/// Cancel every active membership purchase the caller holds.
pub async fn cancel_own(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.cancel_membership(profile.id).await {
        Ok(committed) => {
            let committed = committed.map(|purchases| dto::CancelledMembershipResponse {
                cancelled_purchases: purchases.into_iter().map(Into::into).collect(),
            });
            Json(dto::CommittedResponse::<dto::CancelledMembershipResponse>::from_committed(committed))
                .into_response()
        }
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}
