use axum::{
    extract::State,
    response::Response,
    routing::{get, put},
    Router,
};
use serde_json::json;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{message_response, success_response, JsonBody},
    services::settings::NotificationPreferences,
    AppState,
};

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_settings))
        .route("/notifications", put(update_notification_settings))
        .with_role("buyer")
}

pub async fn get_settings(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let settings = state.services.settings.get_or_create(user.user_id).await?;
    Ok(success_response(json!({ "settings": settings })))
}

pub async fn update_notification_settings(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(prefs): JsonBody<NotificationPreferences>,
) -> Result<Response, ServiceError> {
    let settings = state
        .services
        .settings
        .update_notifications(user.user_id, prefs)
        .await?;
    Ok(message_response(
        "Notification settings updated",
        json!({ "settings": settings }),
    ))
}
