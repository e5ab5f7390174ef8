use axum::{
    extract::{Path, State},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{message_response, success_response, JsonBody},
    services::cart::{AddToCartInput, UpdateQuantityInput},
    AppState,
};

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .route("/items/:product_id", put(update_item).delete(remove_item))
        .route("/clear", delete(clear_cart))
        .with_role("buyer")
}

pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> Result<Response, ServiceError> {
    let cart = state.services.cart.get(user.user_id).await?;
    Ok(success_response(json!({ "cart": cart })))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<AddToCartInput>,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.add(user.user_id, input).await?;
    Ok(message_response("Item added to cart", json!({ "cart": cart })))
}

pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    JsonBody(input): JsonBody<UpdateQuantityInput>,
) -> Result<Response, ServiceError> {
    let cart = state
        .services
        .cart
        .update_quantity(user.user_id, product_id, input.quantity)
        .await?;
    Ok(message_response("Cart updated", json!({ "cart": cart })))
}

pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.remove(user.user_id, product_id).await?;
    Ok(message_response("Item removed from cart", json!({ "cart": cart })))
}

pub async fn clear_cart(State(state): State<AppState>, user: AuthUser) -> Result<Response, ServiceError> {
    let cart = state.services.cart.clear(user.user_id).await?;
    Ok(message_response("Cart cleared", json!({ "cart": cart })))
}
