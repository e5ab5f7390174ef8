use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::json;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{message_response, success_response, JsonBody},
    services::checkout::{CouponCheckInput, SummaryInput},
    AppState,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(checkout_details))
        .route("/validate-coupon", post(validate_coupon))
        .route("/calculate", post(calculate_summary))
        .with_role("buyer")
}

pub async fn checkout_details(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let details = state.services.checkout.details(user.user_id).await?;
    Ok(success_response(details))
}

pub async fn validate_coupon(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CouponCheckInput>,
) -> Result<Response, ServiceError> {
    let quote = state.services.checkout.validate_coupon(input).await?;
    Ok(message_response(
        "Coupon applied successfully",
        json!({ "coupon": quote }),
    ))
}

/// Price preview. Coupon usage is not recorded.
pub async fn calculate_summary(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<SummaryInput>,
) -> Result<Response, ServiceError> {
    let summary = state
        .services
        .checkout
        .calculate(user.user_id, input)
        .await?;
    Ok(success_response(json!({ "summary": summary })))
}
