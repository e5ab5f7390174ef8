use axum::{
    extract::State,
    response::Response,
    routing::get,
    Router,
};
use serde_json::json;

use crate::{
    auth::AuthRouterExt,
    errors::ServiceError,
    handlers::common::{created_response, success_response, JsonBody},
    services::coupons::CreateCouponInput,
    AppState,
};

pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .with_role("admin")
}

pub async fn list_coupons(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let coupons = state.services.coupons.list().await?;
    Ok(success_response(json!({
        "count": coupons.len(),
        "coupons": coupons,
    })))
}

pub async fn create_coupon(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CreateCouponInput>,
) -> Result<Response, ServiceError> {
    let coupon = state.services.coupons.create(input).await?;
    Ok(created_response(
        "Coupon created successfully",
        json!({ "coupon": coupon }),
    ))
}
