use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use orchard_core::ProductId;
use orchard_products::NewProduct;

use crate::app::routes::resolve_caller;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/archive", post(archive_product))
        .route("/:id/purchase", post(purchase_product))
}

fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id("product"))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let input = NewProduct {
        name: body.name,
        product_type: body.product_type,
        price_cents: body.price_cents,
    };

    match services.engine.create_product(profile.id, input).await {
        Ok(product) => (StatusCode::CREATED, Json(dto::ProductResponse::from(product))).into_response(),
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.list_products(profile.id).await {
        Ok(products) => {
            let items: Vec<dto::ProductResponse> = products.into_iter().map(Into::into).collect();
            Json(items).into_response()
        }
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.product(profile.id, product_id).await {
        Ok(product) => Json(dto::ProductResponse::from(product)).into_response(),
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}

/// Soft-delete a product. Archiving a MEMBERSHIP product cascades to its
/// subscribers.
pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.engine.archive_product(product_id, profile.id).await {
        Ok(committed) => {
            Json(dto::CommittedResponse::<dto::ArchiveResponse>::from_committed(committed)).into_response()
        }
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}

/// Purchase a product for the caller. An empty body buys one unit.
pub async fn purchase_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::PurchaseRequest>>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let profile = match resolve_caller(&services, &caller).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let quantity = body.map(|Json(b)| b.quantity).unwrap_or(1);

    match services.engine.purchase(profile.id, product_id, quantity).await {
        Ok(committed) => (
            StatusCode::CREATED,
            Json(dto::CommittedResponse::<dto::PurchaseResponse>::from_committed(committed)),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e, services.expose_internal_errors),
    }
}
