#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use bazaar_api::{
    app_router,
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::user::{self, UserRole},
    events::{self, EventSender},
    gateway::{sign_payment, verify_payment_signature, GatewayError, PaymentGateway, RemoteOrder},
    handlers::{AppServices, Collaborators},
    notifications::{ConnectionRegistry, LogMailer},
    AppState,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "secret123";
pub const GATEWAY_SECRET: &str = "test_gateway_secret";
pub const GATEWAY_KEY: &str = "rzp_test_key";

/// In-process stand-in for the payment gateway. Signatures are real HMACs
/// over `GATEWAY_SECRET`.
#[derive(Default)]
pub struct FakeGateway {
    pub fail_orders: AtomicBool,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_remote_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<RemoteOrder, GatewayError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 502,
                body: "gateway down".into(),
            });
        }
        Ok(RemoteOrder {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount: amount_minor,
            currency: currency.to_string(),
            receipt: Some(receipt.to_string()),
            status: Some("created".into()),
        })
    }

    fn verify_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_payment_signature(GATEWAY_SECRET, gateway_order_id, payment_id, signature)
    }

    fn key_id(&self) -> &str {
        GATEWAY_KEY
    }
}

/// A seeded account and a session token for it.
pub struct TestUser {
    pub model: user::Model,
    pub token: String,
}

impl TestUser {
    pub fn id(&self) -> Uuid {
        self.model.id
    }
}

/// Application backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("bazaar_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth = Arc::new(AuthService::new(
            AuthConfig::new(cfg.jwt_secret.clone(), cfg.jwt_expiration_days, false),
            db.clone(),
        ));

        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(
            db.clone(),
            Arc::new(EventSender::new(event_tx)),
            auth.clone(),
            &cfg.pricing,
            Collaborators {
                gateway: gateway.clone(),
                mailer: Arc::new(LogMailer),
                registry: Arc::new(ConnectionRegistry::new(8)),
            },
        );

        let state = AppState {
            db,
            config: Arc::new(cfg),
            auth,
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
            _dir: dir,
        }
    }

    /// Inserts an account directly; admins cannot self-register.
    pub async fn create_user(&self, role: UserRole, email: &str) -> TestUser {
        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("{} user", role.as_str())),
            email: Set(email.to_string()),
            password_hash: Set(self
                .state
                .auth
                .hash_password(PASSWORD)
                .expect("hash password")),
            role: Set(role),
            phone: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert user");

        let token = self.state.auth.generate_token(&model).expect("sign token");
        TestUser { model, token }
    }

    pub async fn buyer(&self) -> TestUser {
        self.create_user(UserRole::Buyer, &format!("buyer-{}@example.com", Uuid::new_v4().simple()))
            .await
    }

    pub async fn seller(&self) -> TestUser {
        self.create_user(UserRole::Seller, &format!("seller-{}@example.com", Uuid::new_v4().simple()))
            .await
    }

    pub async fn admin(&self) -> TestUser {
        self.create_user(UserRole::Admin, &format!("admin-{}@example.com", Uuid::new_v4().simple()))
            .await
    }

    /// Send a request with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Like [`request`](Self::request) but returns the status and parsed body.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        (status, read_json(response).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None, token).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body), token).await
    }

    /// Category plus one product owned by `seller`.
    pub async fn seed_product(
        &self,
        admin: &TestUser,
        seller: &TestUser,
        name: &str,
        price: f64,
        stock: i32,
    ) -> Value {
        let (status, body) = self
            .post(
                "/api/categories",
                json!({ "name": format!("{} category", name) }),
                Some(&admin.token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "category: {body}");
        let category_id = body["category"]["id"].clone();

        let (status, body) = self
            .post(
                "/api/products",
                json!({
                    "name": name,
                    "description": format!("{} for tests", name),
                    "price": price,
                    "categoryId": category_id,
                    "stock": stock,
                }),
                Some(&seller.token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "product: {body}");
        body["product"].clone()
    }

    pub async fn add_address(&self, buyer: &TestUser) -> String {
        let (status, body) = self
            .post(
                "/api/addresses",
                json!({
                    "fullName": "Asha Rao",
                    "phone": "9876543210",
                    "pincode": "560001",
                    "addressLine1": "12 MG Road",
                    "city": "Bengaluru",
                    "state": "Karnataka",
                }),
                Some(&buyer.token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "address: {body}");
        body["address"]["id"]
            .as_str()
            .expect("address id")
            .to_string()
    }

    pub async fn add_to_cart(&self, buyer: &TestUser, product_id: &Value, quantity: i32) {
        let (status, body) = self
            .post(
                "/api/cart/add",
                json!({ "productId": product_id, "quantity": quantity }),
                Some(&buyer.token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "add to cart: {body}");
    }

    pub async fn create_coupon(&self, admin: &TestUser, code: &str, percent: f64) {
        let (status, body) = self
            .post(
                "/api/coupons",
                json!({
                    "code": code,
                    "discountType": "percentage",
                    "discountValue": percent,
                    "validUntil": (Utc::now() + chrono::Duration::days(30)).to_rfc3339(),
                }),
                Some(&admin.token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "coupon: {body}");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Signature the checkout widget would post back for a successful payment.
pub fn payment_signature(gateway_order_id: &str, payment_id: &str) -> String {
    sign_payment(GATEWAY_SECRET, gateway_order_id, payment_id)
}

pub fn as_f64(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or_else(|| panic!("not a number: {value}"))
}

pub fn assert_money(value: &Value, expected: f64) {
    let actual = as_f64(value);
    assert!(
        (actual - expected).abs() < 0.005,
        "expected {expected}, got {actual}"
    );
}
