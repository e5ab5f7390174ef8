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
    handlers::common::{ack, created_response, message_response, success_response, JsonBody},
    services::addresses::AddressInput,
    AppState,
};

pub fn addresses_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_addresses).post(create_address))
        .route(
            "/:id",
            get(get_address).put(update_address).delete(delete_address),
        )
        .route("/:id/default", put(set_default_address))
        .with_role("buyer")
}

pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let addresses = state.services.addresses.list(user.user_id).await?;
    Ok(success_response(json!({
        "count": addresses.len(),
        "addresses": addresses,
    })))
}

pub async fn get_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let address = state.services.addresses.get(user.user_id, id).await?;
    Ok(success_response(json!({ "address": address })))
}

pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<AddressInput>,
) -> Result<Response, ServiceError> {
    let address = state.services.addresses.create(user.user_id, input).await?;
    Ok(created_response(
        "Address added successfully",
        json!({ "address": address }),
    ))
}

pub async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<AddressInput>,
) -> Result<Response, ServiceError> {
    let address = state
        .services
        .addresses
        .update(user.user_id, id, input)
        .await?;
    Ok(message_response(
        "Address updated successfully",
        json!({ "address": address }),
    ))
}

pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.addresses.delete(user.user_id, id).await?;
    Ok(ack("Address deleted successfully"))
}

pub async fn set_default_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let address = state
        .services
        .addresses
        .set_default(user.user_id, id)
        .await?;
    Ok(message_response(
        "Default address updated",
        json!({ "address": address }),
    ))
}
