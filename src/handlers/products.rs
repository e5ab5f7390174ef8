use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{ack, created_response, message_response, success_response, JsonBody},
    services::products::{CreateProductInput, ProductQuery, UpdateProductInput},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

pub fn products_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
        .route("/seller/:seller_id", get(seller_products));

    let manage = Router::new()
        .route("/", axum::routing::post(create_product))
        .route("/my/products", get(my_products))
        .route("/:id", axum::routing::put(update_product).delete(delete_product))
        .route("/:id/toggle-status", patch(toggle_product_status))
        .with_any_role(&["seller", "admin"]);

    public.merge(manage)
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Response, ServiceError> {
    let page = state.services.products.list(query).await?;
    Ok(success_response(page))
}

/// Accepts either the product id or its slug.
pub async fn get_product(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, ServiceError> {
    let product = state
        .services
        .products
        .get_by_identifier(&identifier)
        .await?;
    Ok(success_response(json!({ "product": product })))
}

pub async fn seller_products(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Response, ServiceError> {
    let page = state
        .services
        .products
        .list_by_seller(seller_id, query.page, query.limit)
        .await?;
    Ok(success_response(page))
}

pub async fn my_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Response, ServiceError> {
    let page = state
        .services
        .products
        .list_own(user.user_id, query.page, query.limit)
        .await?;
    Ok(success_response(page))
}

pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<CreateProductInput>,
) -> Result<Response, ServiceError> {
    let product = state.services.products.create(&user, input).await?;
    Ok(created_response(
        "Product created successfully",
        json!({ "product": product }),
    ))
}

pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<UpdateProductInput>,
) -> Result<Response, ServiceError> {
    let product = state.services.products.update(&user, id, input).await?;
    Ok(message_response(
        "Product updated successfully",
        json!({ "product": product }),
    ))
}

pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.products.delete(&user, id).await?;
    Ok(ack("Product deleted successfully"))
}

pub async fn toggle_product_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let product = state.services.products.toggle_status(&user, id).await?;
    let message = if product.is_active {
        "Product activated successfully"
    } else {
        "Product deactivated successfully"
    };
    Ok(message_response(message, json!({ "product": product })))
}
