use axum::{
    extract::State,
    response::Response,
    routing::post,
    Router,
};
use serde_json::json;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{ack, created_response, message_response, JsonBody},
    services::{
        orders::{PlaceOrderInput, Placement},
        payments::{PaymentFailureInput, VerifyPaymentInput},
    },
    AppState,
};

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-order", post(create_order))
        .route("/verify", post(verify_payment))
        .route("/failed", post(payment_failed))
        .with_role("buyer")
}

/// Places an order from the cart. Cash on delivery is confirmed right away;
/// online methods return the gateway order the client pays against.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<PlaceOrderInput>,
) -> Result<Response, ServiceError> {
    let placement = state.services.orders.place(user.user_id, input).await?;
    Ok(match placement {
        Placement::CashOnDelivery(order) => created_response(
            "Order placed successfully",
            json!({ "order": order, "paymentMethod": "cod" }),
        ),
        Placement::Online {
            order,
            gateway_order,
            key_id,
        } => created_response(
            "Order created, proceed with payment",
            json!({
                "order": order,
                "razorpayOrder": {
                    "id": gateway_order.id,
                    "amount": gateway_order.amount,
                    "currency": gateway_order.currency,
                    "key": key_id,
                },
            }),
        ),
    })
}

pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<VerifyPaymentInput>,
) -> Result<Response, ServiceError> {
    let order = state.services.payments.verify(user.user_id, input).await?;
    Ok(message_response(
        "Payment verified and order confirmed",
        json!({ "order": order }),
    ))
}

pub async fn payment_failed(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<PaymentFailureInput>,
) -> Result<Response, ServiceError> {
    state
        .services
        .payments
        .record_failure(user.user_id, input)
        .await?;
    Ok(ack("Payment failure recorded"))
}
