use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, put},
    Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{message_response, success_response, JsonBody},
    services::orders::{CancelInput, StatusUpdateInput},
    AppState,
};

pub fn orders_routes() -> Router<AppState> {
    let buyer = Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", put(cancel_order))
        .route("/:id/invoice", get(order_invoice))
        .route("/:id/track", get(track_order))
        .with_role("buyer");

    let admin = Router::new()
        .route("/:id/status", put(update_order_status))
        .with_role("admin");

    buyer.merge(admin)
}

pub async fn list_orders(State(state): State<AppState>, user: AuthUser) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list(user.user_id).await?;
    Ok(success_response(json!({
        "count": orders.len(),
        "orders": orders,
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.get(user.user_id, id).await?;
    Ok(success_response(json!({ "order": order })))
}

/// An empty body is allowed; the reason then defaults.
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    input: Option<JsonBody<CancelInput>>,
) -> Result<Response, ServiceError> {
    let input = input.map(|JsonBody(i)| i).unwrap_or_default();
    let order = state.services.orders.cancel(user.user_id, id, input).await?;
    Ok(message_response(
        "Order cancelled successfully",
        json!({ "order": order }),
    ))
}

pub async fn order_invoice(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let invoice = state.services.orders.invoice(user.user_id, id).await?;
    Ok(success_response(json!({ "invoice": invoice })))
}

pub async fn track_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let tracking = state.services.orders.track(user.user_id, id).await?;
    Ok(success_response(json!({ "tracking": tracking })))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<StatusUpdateInput>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.update_status(id, input).await?;
    Ok(message_response(
        "Order status updated",
        json!({ "order": order }),
    ))
}
