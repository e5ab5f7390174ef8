mod common;

use std::sync::atomic::Ordering;

use axum::http::{Method, StatusCode};
use common::{assert_money, payment_signature, TestApp, TestUser, GATEWAY_KEY};
use serde_json::{json, Value};

struct Shop {
    app: TestApp,
    admin: TestUser,
    buyer: TestUser,
    product: Value,
    address_id: String,
}

impl Shop {
    /// Buyer with two units of a 300.00 product in the cart.
    async fn with_cart() -> Self {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let seller = app.seller().await;
        let buyer = app.buyer().await;

        let product = app.seed_product(&admin, &seller, "Desk Lamp", 300.0, 5).await;
        let address_id = app.add_address(&buyer).await;
        app.add_to_cart(&buyer, &product["id"], 2).await;

        Self {
            app,
            admin,
            buyer,
            product,
            address_id,
        }
    }

    fn product_id(&self) -> &str {
        self.product["id"].as_str().expect("product id")
    }

    async fn place(&self, method: &str, coupon: Option<&str>) -> (StatusCode, Value) {
        let mut body = json!({ "addressId": self.address_id, "paymentMethod": method });
        if let Some(code) = coupon {
            body["couponCode"] = json!(code);
        }
        self.app
            .post("/api/payment/create-order", body, Some(&self.buyer.token))
            .await
    }

    async fn stock(&self) -> i64 {
        let (status, body) = self
            .app
            .get(&format!("/api/products/{}", self.product_id()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body["product"]["stock"].as_i64().expect("stock")
    }

    async fn cart_items(&self) -> usize {
        let (status, body) = self.app.get("/api/cart", Some(&self.buyer.token)).await;
        assert_eq!(status, StatusCode::OK);
        body["cart"]["items"].as_array().map(Vec::len).unwrap_or(0)
    }
}

fn last_history_entry(order: &Value) -> &Value {
    order["statusHistory"]
        .as_array()
        .and_then(|h| h.last())
        .expect("status history")
}

#[tokio::test]
async fn cash_on_delivery_confirms_and_takes_stock() {
    let shop = Shop::with_cart().await;

    let (status, body) = shop.place("cod", None).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Order placed successfully");
    assert_eq!(body["paymentMethod"], "cod");

    let order = &body["order"];
    assert_eq!(order["orderStatus"], "confirmed");
    assert_eq!(order["paymentStatus"], "pending");
    assert_money(&order["itemsPrice"], 600.0);
    assert_money(&order["taxPrice"], 108.0);
    assert_money(&order["shippingPrice"], 0.0);
    assert_money(&order["totalPrice"], 708.0);
    assert!(order["orderNumber"]
        .as_str()
        .unwrap_or_default()
        .starts_with("ORD-"));

    assert_eq!(shop.stock().await, 3);
    assert_eq!(shop.cart_items().await, 0);

    let (status, body) = shop
        .app
        .get("/api/notifications/unread-count", Some(&shop.buyer.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["unreadCount"].as_u64().unwrap_or(0) >= 1);
}

#[tokio::test]
async fn coupon_discount_is_applied_before_tax() {
    let shop = Shop::with_cart().await;
    shop.app.create_coupon(&shop.admin, "save10", 10.0).await;

    let (status, body) = shop
        .app
        .post(
            "/api/checkout/calculate",
            json!({ "couponCode": "SAVE10" }),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_money(&body["summary"]["discountAmount"], 60.0);
    assert_money(&body["summary"]["totalPrice"], 637.2);

    let (status, body) = shop.place("cod", Some("save10")).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order = &body["order"];
    assert_eq!(order["couponCode"], "SAVE10");
    assert_money(&order["discountAmount"], 60.0);
    assert_money(&order["taxPrice"], 97.2);
    assert_money(&order["totalPrice"], 637.2);
}

#[tokio::test]
async fn online_order_waits_for_verified_payment() {
    let shop = Shop::with_cart().await;

    let (status, body) = shop.place("card", None).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["message"], "Order created, proceed with payment");
    assert_eq!(body["order"]["orderStatus"], "pending");
    assert_eq!(body["razorpayOrder"]["amount"], 70_800);
    assert_eq!(body["razorpayOrder"]["currency"], "INR");
    assert_eq!(body["razorpayOrder"]["key"], GATEWAY_KEY);

    // Nothing is taken until the payment is verified.
    assert_eq!(shop.stock().await, 5);
    assert_eq!(shop.cart_items().await, 1);

    let order_id = body["order"]["id"].as_str().expect("order id").to_string();
    let gateway_order_id = body["razorpayOrder"]["id"]
        .as_str()
        .expect("gateway order id")
        .to_string();
    let verify = json!({
        "razorpay_order_id": gateway_order_id,
        "razorpay_payment_id": "pay_123",
        "razorpay_signature": payment_signature(&gateway_order_id, "pay_123"),
        "orderId": order_id,
    });

    let (status, body) = shop
        .app
        .post("/api/payment/verify", verify.clone(), Some(&shop.buyer.token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Payment verified and order confirmed");
    assert_eq!(body["order"]["orderStatus"], "confirmed");
    assert_eq!(body["order"]["paymentStatus"], "completed");
    assert_eq!(shop.stock().await, 3);
    assert_eq!(shop.cart_items().await, 0);

    // A replayed verification is a no-op.
    let (status, _) = shop
        .app
        .post("/api/payment/verify", verify, Some(&shop.buyer.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shop.stock().await, 3);
}

#[tokio::test]
async fn bad_signature_leaves_order_pending() {
    let shop = Shop::with_cart().await;

    let (_, body) = shop.place("upi", None).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();
    let gateway_order_id = body["razorpayOrder"]["id"].as_str().expect("id").to_string();

    let (status, body) = shop
        .app
        .post(
            "/api/payment/verify",
            json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": "pay_123",
                "razorpay_signature": payment_signature(&gateway_order_id, "pay_other"),
            }),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Payment verification failed");

    let (_, body) = shop
        .app
        .get(&format!("/api/orders/{order_id}"), Some(&shop.buyer.token))
        .await;
    assert_eq!(body["order"]["orderStatus"], "pending");
    assert_eq!(body["order"]["paymentStatus"], "pending");
    assert_eq!(shop.stock().await, 5);
}

#[tokio::test]
async fn reported_failure_marks_order_payment_failed() {
    let shop = Shop::with_cart().await;

    let (_, body) = shop.place("card", None).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();
    let gateway_order_id = body["razorpayOrder"]["id"].as_str().expect("id").to_string();

    let (status, body) = shop
        .app
        .post(
            "/api/payment/failed",
            json!({
                "razorpay_order_id": gateway_order_id,
                "error": { "description": "Card declined" },
            }),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) = shop
        .app
        .get(&format!("/api/orders/{order_id}"), Some(&shop.buyer.token))
        .await;
    assert_eq!(body["order"]["orderStatus"], "payment_failed");
    assert_eq!(body["order"]["paymentStatus"], "failed");
}

#[tokio::test]
async fn gateway_outage_returns_server_error() {
    let shop = Shop::with_cart().await;
    shop.app.gateway.fail_orders.store(true, Ordering::SeqCst);

    let (status, body) = shop.place("card", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "External service error: gateway rejected request with status 502: gateway down"
    );

    let (_, body) = shop.app.get("/api/orders", Some(&shop.buyer.token)).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["orders"][0]["orderStatus"], "pending");
}

#[tokio::test]
async fn order_placement_rejects_bad_requests() {
    let shop = Shop::with_cart().await;

    let (status, body) = shop
        .app
        .post(
            "/api/payment/create-order",
            json!({ "paymentMethod": "cod" }),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Please provide address and payment method");

    let (status, body) = shop.place("barter", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid payment method");

    let (_, orders) = shop.app.get("/api/orders", Some(&shop.buyer.token)).await;
    assert_eq!(orders["count"], 0);
}

#[tokio::test]
async fn empty_cart_cannot_be_ordered() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;
    let address_id = app.add_address(&buyer).await;

    let (status, body) = app
        .post(
            "/api/payment/create-order",
            json!({ "addressId": address_id, "paymentMethod": "cod" }),
            Some(&buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Cart is empty");
}

#[tokio::test]
async fn buyer_can_cancel_until_processing() {
    let shop = Shop::with_cart().await;

    let (_, body) = shop.place("cod", None).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();

    let (status, body) = shop
        .app
        .call(
            Method::PUT,
            &format!("/api/orders/{order_id}/cancel"),
            None,
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["orderStatus"], "cancelled");
    let last = last_history_entry(&body["order"]);
    assert_eq!(last["status"], "cancelled");
    assert_eq!(last["note"], "Cancelled by customer");
    // Cancellation does not return stock.
    assert_eq!(shop.stock().await, 3);

    let (status, body) = shop
        .app
        .call(
            Method::PUT,
            &format!("/api/orders/{order_id}/cancel"),
            None,
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Order cannot be cancelled at this stage");
}

#[tokio::test]
async fn cancelled_online_order_cannot_be_paid() {
    let shop = Shop::with_cart().await;

    let (_, body) = shop.place("card", None).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();
    let gateway_order_id = body["razorpayOrder"]["id"].as_str().expect("id").to_string();

    let (status, body) = shop
        .app
        .call(
            Method::PUT,
            &format!("/api/orders/{order_id}/cancel"),
            Some(json!({ "reason": "Changed my mind" })),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["orderStatus"], "cancelled");
    let last = last_history_entry(&body["order"]);
    assert_eq!(last["status"], "cancelled");
    assert_eq!(last["note"], "Changed my mind");

    let (status, body) = shop
        .app
        .post(
            "/api/payment/verify",
            json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": "pay_late",
                "razorpay_signature": payment_signature(&gateway_order_id, "pay_late"),
                "orderId": order_id,
            }),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Cannot verify payment for a cancelled order");
    assert_eq!(shop.stock().await, 5);

    // A failure report afterwards touches the payment but not the order.
    let (status, _) = shop
        .app
        .post(
            "/api/payment/failed",
            json!({ "razorpay_order_id": gateway_order_id }),
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = shop
        .app
        .get(&format!("/api/orders/{order_id}"), Some(&shop.buyer.token))
        .await;
    assert_eq!(body["order"]["orderStatus"], "cancelled");
    let history = body["order"]["statusHistory"].as_array().expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["status"], "cancelled");
}

#[tokio::test]
async fn delivered_cod_order_is_paid_and_invoiced() {
    let shop = Shop::with_cart().await;

    let (_, body) = shop.place("cod", None).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();

    let (status, body) = shop
        .app
        .get(&format!("/api/orders/{order_id}/invoice"), Some(&shop.buyer.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invoice is only available for delivered orders");

    for next in ["shipped", "delivered"] {
        let (status, body) = shop
            .app
            .call(
                Method::PUT,
                &format!("/api/orders/{order_id}/status"),
                Some(json!({ "status": next, "trackingNumber": "TRK1" })),
                Some(&shop.admin.token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{next}: {body}");
    }

    let (_, body) = shop
        .app
        .get(&format!("/api/orders/{order_id}"), Some(&shop.buyer.token))
        .await;
    assert_eq!(body["order"]["orderStatus"], "delivered");
    assert_eq!(body["order"]["paymentStatus"], "completed");

    let (status, body) = shop
        .app
        .get(&format!("/api/orders/{order_id}/invoice"), Some(&shop.buyer.token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_money(&body["invoice"]["total"], 708.0);

    let (status, body) = shop
        .app
        .call(
            Method::PUT,
            &format!("/api/orders/{order_id}/cancel"),
            None,
            Some(&shop.buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn invalid_status_transition_is_rejected() {
    let shop = Shop::with_cart().await;

    let (_, body) = shop.place("cod", None).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();

    let (status, body) = shop
        .app
        .call(
            Method::PUT,
            &format!("/api/orders/{order_id}/status"),
            Some(json!({ "status": "delivered" })),
            Some(&shop.admin.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Cannot change order status from confirmed to delivered"
    );
}

#[tokio::test]
async fn insufficient_stock_blocks_the_order() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let seller = app.seller().await;
    let buyer = app.buyer().await;
    let other = app.buyer().await;

    let product = app.seed_product(&admin, &seller, "Last One", 100.0, 1).await;
    let address_id = app.add_address(&buyer).await;
    let other_address = app.add_address(&other).await;
    app.add_to_cart(&buyer, &product["id"], 1).await;
    app.add_to_cart(&other, &product["id"], 1).await;

    let (status, _) = app
        .post(
            "/api/payment/create-order",
            json!({ "addressId": address_id, "paymentMethod": "cod" }),
            Some(&buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .post(
            "/api/payment/create-order",
            json!({ "addressId": other_address, "paymentMethod": "cod" }),
            Some(&other.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Insufficient stock for Last One");
}
