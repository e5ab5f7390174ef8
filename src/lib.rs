//! Bazaar API Library
//!
//! Multi-tenant marketplace backend: catalog, carts, checkout, orders,
//! payments, reviews, wishlists and in-app notifications.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod services;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::errors::ErrorResponse;

/// Upper bound for producing a response head; streamed bodies are unaffected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

/// All `/api` routes, one nested router per resource.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", handlers::auth::auth_routes())
        .nest("/products", handlers::products::products_routes())
        .nest("/categories", handlers::categories::categories_routes())
        .nest("/cart", handlers::cart::cart_routes())
        .nest("/addresses", handlers::addresses::addresses_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/payment", handlers::payments::payment_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/reviews", handlers::reviews::reviews_routes())
        .nest("/wishlist", handlers::wishlist::wishlist_routes())
        .nest("/notifications", handlers::notifications::notifications_routes())
        .nest("/settings", handlers::settings::settings_routes())
        .nest("/coupons", handlers::coupons::coupons_routes())
}

/// Fully layered application router.
///
/// The auth service is injected into request extensions here so that the
/// per-router auth middleware can find it.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .fallback(route_not_found)
        .layer(axum::middleware::from_fn(request_logging_middleware))
        .layer(Extension(state.auth.clone()))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Explicit origins get credentialed CORS. Without any, development mirrors
/// the caller's origin and other environments allow none.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if !origins.is_empty() {
        AllowOrigin::list(origins)
    } else if config.is_development() {
        AllowOrigin::mirror_request()
    } else {
        warn!("no CORS origins configured; cross-origin requests will be refused");
        AllowOrigin::list(Vec::new())
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(config.cors_allow_credentials)
}

async fn health_check(State(state): State<AppState>) -> Response {
    let database = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            warn!(error = %e, "health check: database unreachable");
            "unhealthy"
        }
    };
    let status = if database == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "success": status.is_success(),
            "status": database,
            "environment": state.config.environment,
            "checks": { "database": database },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn route_not_found(uri: Uri) -> Response {
    let status = StatusCode::NOT_FOUND;
    (
        status,
        Json(ErrorResponse::new(status, format!("Route {} not found", uri.path()))),
    )
        .into_response()
}

async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

pub mod prelude {
    pub use crate::auth::{AuthRouterExt, AuthService, AuthUser};
    pub use crate::errors::{ApiError, ServiceError};
    pub use crate::handlers::{AppServices, Collaborators};
    pub use crate::{app_router, AppState};
}
