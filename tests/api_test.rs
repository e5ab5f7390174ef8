mod common;

use axum::http::{header, Method, StatusCode};
use common::{read_json, TestApp, PASSWORD};
use rstest::rstest;
use serde_json::json;

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "healthy");
}

#[tokio::test]
async fn unknown_route_uses_error_envelope() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/api/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Route /api/nope not found");
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, None).await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn register_sets_session_cookie() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/auth/register",
            Some(json!({
                "name": "Meera",
                "email": "Meera@Example.com",
                "password": PASSWORD,
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("token="), "{cookie}");
    assert!(cookie.contains("HttpOnly"));

    let body = read_json(response).await;
    assert_eq!(body["message"], "User registered successfully");
    assert_eq!(body["user"]["email"], "meera@example.com");
    assert_eq!(body["user"]["role"], "buyer");
    assert!(body["user"].get("passwordHash").is_none());

    let token = body["token"].as_str().expect("token");
    let (status, me) = app
        .call(Method::GET, "/api/auth/me", None, Some(token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["name"], "Meera");

    let (status, body) = app
        .post(
            "/api/auth/register",
            json!({ "name": "Again", "email": "meera@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User already exists with this email");
}

#[rstest]
#[case(json!({ "email": "a@b.co", "password": "secret123" }), "Please provide name, email, and password")]
#[case(json!({ "name": "A", "email": "not-an-email", "password": "secret123" }), "Please provide a valid email address")]
#[case(json!({ "name": "A", "email": "a@b.co", "password": "123" }), "Password must be at least 6 characters")]
#[case(json!({ "name": "A", "email": "a@b.co", "password": "secret123", "role": "admin" }), "Role must be either \"buyer\" or \"seller\"")]
#[tokio::test]
async fn register_rejects_bad_input(#[case] body: serde_json::Value, #[case] message: &str) {
    let app = TestApp::new().await;
    let (status, response) = app.post("/api/auth/register", body, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["message"], message);
}

#[tokio::test]
async fn logins_are_split_by_front_end() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;
    let seller = app.seller().await;

    let (status, _) = app
        .post(
            "/api/auth/login",
            json!({ "email": buyer.model.email, "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/auth/login",
            json!({ "email": buyer.model.email, "password": "wrong-password" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, _) = app
        .post(
            "/api/auth/login",
            json!({ "email": seller.model.email, "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(
            "/api/auth/seller/login",
            json!({ "email": seller.model.email, "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["role"], "seller");

    let (status, _) = app
        .post(
            "/api/auth/seller/login",
            json!({ "email": buyer.model.email, "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn check_never_fails() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;

    let (status, body) = app.get("/api/auth/check", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], false);

    let (_, body) = app.get("/api/auth/check", Some("garbage")).await;
    assert_eq!(body["authenticated"], false);

    let (_, body) = app.get("/api/auth/check", Some(&buyer.token)).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["id"], buyer.id().to_string());
}

#[tokio::test]
async fn role_gates_reject_the_wrong_callers() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;
    let seller = app.seller().await;

    let (status, body) = app.get("/api/cart", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not authorized, please login");

    let (status, body) = app.get("/api/cart", Some("not.a.jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not authorized, token failed");

    let (status, body) = app.get("/api/cart", Some(&seller.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Access denied. This section is for buyers only.");

    let (status, body) = app
        .post("/api/products", json!({ "name": "x" }), Some(&buyer.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You do not have permission to perform this action");

    let (status, _) = app.get("/api/coupons", Some(&seller.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;

    let (status, body) = app
        .post("/api/cart/add", json!({ "quantity": 2 }), Some(&buyer.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn catalog_lists_and_resolves_slugs() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let seller = app.seller().await;

    let lamp = app.seed_product(&admin, &seller, "Desk Lamp", 300.0, 5).await;
    app.seed_product(&admin, &seller, "Floor Rug", 1200.0, 0).await;

    let (status, body) = app.get("/api/products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (_, body) = app.get("/api/products?search=lamp", None).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["products"][0]["id"], lamp["id"]);

    let (_, body) = app.get("/api/products?inStock=true", None).await;
    assert_eq!(body["total"], 1);

    let (status, body) = app.get("/api/products/desk-lamp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product"]["id"], lamp["id"]);

    let category = lamp["categoryId"].as_str().expect("category id");
    let (status, body) = app
        .get(&format!("/api/categories/{category}/products"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total"], 1);

    let (status, body) = app.get("/api/products/missing-thing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Product not found");
}

#[tokio::test]
async fn sellers_only_edit_their_own_products() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let seller = app.seller().await;
    let rival = app.seller().await;

    let lamp = app.seed_product(&admin, &seller, "Desk Lamp", 300.0, 5).await;
    let uri = format!("/api/products/{}", lamp["id"].as_str().expect("id"));

    let (status, _) = app
        .call(Method::PUT, &uri, Some(json!({ "stock": 1 })), Some(&rival.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::PUT, &uri, Some(json!({ "stock": 9 })), Some(&seller.token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["product"]["stock"], 9);

    let (status, _) = app
        .call(Method::PUT, &uri, Some(json!({ "stock": 2 })), Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reviews_update_product_rating() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let seller = app.seller().await;
    let alice = app.buyer().await;
    let bob = app.buyer().await;

    let lamp = app.seed_product(&admin, &seller, "Desk Lamp", 300.0, 5).await;
    let product_id = lamp["id"].clone();

    let (status, body) = app
        .post(
            "/api/reviews",
            json!({ "product": product_id, "rating": 5, "comment": "Bright and sturdy" }),
            Some(&alice.token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["review"]["verified"], false);
    let review_id = body["review"]["id"].as_str().expect("review id").to_string();

    let (status, body) = app
        .post(
            "/api/reviews",
            json!({ "product": product_id, "rating": 4, "comment": "Again" }),
            Some(&alice.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "You have already reviewed this product");

    let (status, _) = app
        .post(
            "/api/reviews",
            json!({ "product": product_id, "rating": 4, "comment": "Good value" }),
            Some(&bob.token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app
        .get(&format!("/api/products/{}", product_id.as_str().unwrap_or_default()), None)
        .await;
    assert_eq!(body["product"]["numReviews"], 2);
    common::assert_money(&body["product"]["averageRating"], 4.5);

    let (status, body) = app
        .post(&format!("/api/reviews/{review_id}/helpful"), json!({}), Some(&bob.token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["helpfulCount"], 1);

    let (status, body) = app
        .post(&format!("/api/reviews/{review_id}/helpful"), json!({}), Some(&bob.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "You have already marked this review as helpful");

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/reviews/{review_id}"),
            Some(json!({ "rating": 1 })),
            Some(&bob.token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .get(
            &format!("/api/reviews/product/{}", product_id.as_str().unwrap_or_default()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn wishlist_toggle_round_trip() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let seller = app.seller().await;
    let buyer = app.buyer().await;

    let lamp = app.seed_product(&admin, &seller, "Desk Lamp", 300.0, 5).await;
    let product_id = lamp["id"].as_str().expect("id").to_string();

    let (status, body) = app
        .post("/api/wishlist/toggle", json!({ "productId": product_id }), Some(&buyer.token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["isAdded"], true);
    assert_eq!(body["wishlistItems"].as_array().map(Vec::len), Some(1));

    let (_, body) = app
        .get(&format!("/api/wishlist/check/{product_id}"), Some(&buyer.token))
        .await;
    assert_eq!(body["inWishlist"], true);

    let (status, body) = app
        .post("/api/wishlist/add", json!({ "productId": product_id }), Some(&buyer.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Product already in wishlist");

    let (_, body) = app
        .post("/api/wishlist/toggle", json!({ "productId": product_id }), Some(&buyer.token))
        .await;
    assert_eq!(body["isAdded"], false);

    let (status, body) = app
        .post("/api/wishlist/add", json!({}), Some(&buyer.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Product ID is required");
}

#[tokio::test]
async fn addresses_keep_a_single_default() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;

    let first = app.add_address(&buyer).await;
    let second = app.add_address(&buyer).await;

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/addresses/{second}/default"),
            None,
            Some(&buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/api/addresses", Some(&buyer.token)).await;
    let addresses = body["addresses"].as_array().cloned().unwrap_or_default();
    assert_eq!(addresses.len(), 2);
    let defaults: Vec<_> = addresses
        .iter()
        .filter(|a| a["isDefault"] == true)
        .map(|a| a["id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(defaults, vec![second]);
    assert!(addresses.iter().any(|a| a["id"] == first.as_str()));

    let (status, body) = app
        .post(
            "/api/addresses",
            json!({
                "fullName": "Asha Rao",
                "phone": "12345",
                "pincode": "560001",
                "addressLine1": "12 MG Road",
                "city": "Bengaluru",
                "state": "Karnataka",
            }),
            Some(&buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Please enter valid 10-digit phone number");
}
