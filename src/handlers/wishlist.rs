use axum::{
    extract::{Path, State},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{message_response, success_response, JsonBody},
    services::wishlist::WishlistInput,
    AppState,
};

pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_wishlist))
        .route("/add", post(add_to_wishlist))
        .route("/toggle", post(toggle_wishlist))
        .route("/remove/:product_id", delete(remove_from_wishlist))
        .route("/clear", delete(clear_wishlist))
        .route("/check/:product_id", get(check_wishlist))
        .with_auth()
}

pub async fn get_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let items = state.services.wishlist.get(user.user_id).await?;
    Ok(success_response(json!({ "wishlistItems": items })))
}

pub async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<WishlistInput>,
) -> Result<Response, ServiceError> {
    let product_id = input.require_product()?;
    let items = state.services.wishlist.add(user.user_id, product_id).await?;
    Ok(message_response(
        "Product added to wishlist",
        json!({ "wishlistItems": items }),
    ))
}

pub async fn toggle_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<WishlistInput>,
) -> Result<Response, ServiceError> {
    let product_id = input.require_product()?;
    let (added, items) = state
        .services
        .wishlist
        .toggle(user.user_id, product_id)
        .await?;
    let message = if added {
        "Product added to wishlist"
    } else {
        "Product removed from wishlist"
    };
    Ok(message_response(
        message,
        json!({ "isAdded": added, "wishlistItems": items }),
    ))
}

pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let items = state
        .services
        .wishlist
        .remove(user.user_id, product_id)
        .await?;
    Ok(message_response(
        "Product removed from wishlist",
        json!({ "wishlistItems": items }),
    ))
}

pub async fn clear_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    state.services.wishlist.clear(user.user_id).await?;
    Ok(message_response(
        "Wishlist cleared",
        json!({ "wishlistItems": [] }),
    ))
}

pub async fn check_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let in_wishlist = state
        .services
        .wishlist
        .contains(user.user_id, product_id)
        .await?;
    Ok(success_response(json!({ "inWishlist": in_wishlist })))
}
