use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde_json::json;

use crate::{
    auth::{extract_token, AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{ack, envelope, message_response, success_response, JsonBody},
    services::accounts::{
        ChangePasswordInput, LoginAudience, LoginInput, RegisterInput, Session,
        UpdateProfileInput, UserProfile,
    },
    AppState,
};

pub fn auth_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/seller/login", post(seller_login))
        .route("/logout", post(logout))
        .route("/check", get(check));

    let protected = Router::new()
        .route("/me", get(me))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
        .with_auth();

    public.merge(protected)
}

fn session_response(state: &AppState, status: StatusCode, message: &str, session: Session) -> Response {
    let cookie = state.auth.session_cookie(&session.token);
    let body = envelope(
        Some(message),
        json!({
            "user": UserProfile::from(&session.user),
            "token": session.token,
        }),
    );
    (status, [(header::SET_COOKIE, cookie)], axum::Json(body)).into_response()
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<RegisterInput>,
) -> Result<Response, ServiceError> {
    let session = state.services.accounts.register(input).await?;
    Ok(session_response(
        &state,
        StatusCode::CREATED,
        "User registered successfully",
        session,
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<LoginInput>,
) -> Result<Response, ServiceError> {
    let session = state
        .services
        .accounts
        .login(input, LoginAudience::Storefront)
        .await?;
    Ok(session_response(&state, StatusCode::OK, "Login successful", session))
}

/// Login for the seller/admin panel.
pub async fn seller_login(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<LoginInput>,
) -> Result<Response, ServiceError> {
    let session = state
        .services
        .accounts
        .login(input, LoginAudience::Panel)
        .await?;
    Ok(session_response(&state, StatusCode::OK, "Login successful", session))
}

pub async fn logout(State(state): State<AppState>) -> Response {
    let cookie = state.auth.clear_cookie();
    (
        [(header::SET_COOKIE, cookie)],
        ack("Logged out successfully"),
    )
        .into_response()
}

/// Never fails: an absent or bad token reports `authenticated: false`.
pub async fn check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = extract_token(&headers);
    match state.services.accounts.check(token.as_deref()).await {
        Some(user) => success_response(json!({
            "authenticated": true,
            "user": UserProfile::from(&user),
        })),
        None => success_response(json!({
            "authenticated": false,
            "user": null,
        })),
    }
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Response, ServiceError> {
    let account = state.services.accounts.profile(user.user_id).await?;
    Ok(success_response(json!({ "user": UserProfile::from(&account) })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<UpdateProfileInput>,
) -> Result<Response, ServiceError> {
    let account = state
        .services
        .accounts
        .update_profile(user.user_id, input)
        .await?;
    Ok(message_response(
        "Profile updated successfully",
        json!({ "user": UserProfile::from(&account) }),
    ))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<ChangePasswordInput>,
) -> Result<Response, ServiceError> {
    state
        .services
        .accounts
        .change_password(user.user_id, input)
        .await?;
    Ok(ack("Password changed successfully"))
}
