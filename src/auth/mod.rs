/*!
 * # Authentication and Authorization Module
 *
 * JWT sessions for the marketplace. Tokens are issued at login/registration,
 * delivered in an httpOnly `token` cookie and also accepted as a Bearer
 * header. Every protected request reloads the account so deactivated users
 * are rejected immediately.
 *
 * Role gating is layered on routers through [`AuthRouterExt`].
 */

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::user::{self, UserRole};
use crate::errors::ErrorResponse;

/// Name of the session cookie.
pub const TOKEN_COOKIE: &str = "token";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated user attached to request extensions by [`auth_middleware`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_str() == role
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl From<&user::Model> for AuthUser {
    fn from(user: &user::Model) -> Self {
        Self {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Reads the user placed in extensions by [`auth_middleware`]. Handlers on
/// routers without the middleware are rejected as unauthenticated.
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_lifetime: Duration,
    /// Adds `Secure` to the session cookie
    pub secure_cookie: bool,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, token_lifetime_days: i64, secure_cookie: bool) -> Self {
        Self {
            jwt_secret,
            token_lifetime: Duration::days(token_lifetime_days),
            secure_cookie,
        }
    }
}

/// Issues and validates session tokens and hashes passwords.
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    pub db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Sign a token for the given account
    pub fn generate_token(&self, user: &user::Model) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + self.config.token_lifetime).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Resolve a token to a live, active account
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?
            .ok_or(AuthError::UserNotFound)?;

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        Ok(AuthUser::from(&user))
    }

    /// Hash a password using Argon2id.
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::PasswordHash(e.to_string()))
    }

    /// Verify a password against a stored hash.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<(), AuthError> {
        let parsed = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)
    }

    /// `Set-Cookie` value carrying a fresh session token
    pub fn session_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
            TOKEN_COOKIE,
            token,
            self.config.token_lifetime.num_seconds()
        );
        if self.config.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value that expires the session cookie
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=none; HttpOnly; Path=/; Max-Age=0; SameSite=Lax",
            TOKEN_COOKIE
        )
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authorized, please login")]
    MissingToken,

    #[error("Not authorized, token failed")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("User account is deactivated")]
    AccountDisabled,

    #[error("{0}")]
    InsufficientPermissions(String),

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Authentication service not available")]
    ServiceUnavailable,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::InvalidCredentials
            | Self::UserNotFound
            | Self::AccountDisabled => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::TokenCreation(_)
            | Self::PasswordHash(_)
            | Self::DatabaseError(_)
            | Self::ServiceUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::TokenExpired => "Not authorized, token failed".to_string(),
            Self::DatabaseError(_) => {
                warn!(error = %self, "authentication failure");
                "Database error".to_string()
            }
            Self::TokenCreation(_) | Self::PasswordHash(_) => {
                warn!(error = %self, "authentication failure");
                self.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse::new(status, message))).into_response()
    }
}

impl From<AuthError> for crate::errors::ServiceError {
    fn from(err: AuthError) -> Self {
        use crate::errors::ServiceError;
        match err {
            AuthError::InsufficientPermissions(msg) => ServiceError::Forbidden(msg),
            AuthError::PasswordHash(msg) => ServiceError::HashError(msg),
            AuthError::TokenCreation(msg) => ServiceError::JwtError(msg),
            AuthError::DatabaseError(msg) => ServiceError::InternalError(msg),
            AuthError::ServiceUnavailable => {
                ServiceError::InternalError("auth service missing".into())
            }
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

/// Roles allowed through a gated router, plus the message shown to others.
#[derive(Clone, Debug)]
pub struct RoleRequirement {
    pub roles: Vec<String>,
    pub message: String,
}

impl RoleRequirement {
    fn for_roles(roles: &[&str]) -> Self {
        let message = if roles == ["buyer"] {
            "Access denied. This section is for buyers only."
        } else {
            "You do not have permission to perform this action"
        };
        Self {
            roles: roles.iter().map(|r| r.to_string()).collect(),
            message: message.to_string(),
        }
    }
}

/// Role middleware to check if a user has one of the required roles
pub async fn role_middleware(
    State(requirement): State<RoleRequirement>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or(AuthError::MissingToken)?;

    if !requirement.roles.iter().any(|r| user.has_role(r)) {
        debug!(user_id = %user.user_id, role = user.role.as_str(), "role check failed");
        return Err(AuthError::InsufficientPermissions(requirement.message));
    }

    Ok(next.run(request).await)
}

/// Authentication middleware that extracts and validates the session token
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => return AuthError::ServiceUnavailable.into_response(),
    };

    let token = match extract_token(request.headers()) {
        Some(token) => token,
        None => return AuthError::MissingToken.into_response(),
    };

    match auth_service.authenticate(&token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Pull the session token from the cookie, falling back to a Bearer header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty() && *value != "none")
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_role(self, role: &str) -> Self;
    fn with_any_role(self, roles: &[&str]) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_role(self, role: &str) -> Self {
        self.with_any_role(&[role])
    }

    fn with_any_role(self, roles: &[&str]) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            RoleRequirement::for_roles(roles),
            role_middleware,
        ))
        .with_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> AuthService {
        let db = DatabaseConnection::Disconnected;
        AuthService::new(
            AuthConfig::new("unit_test_secret_that_is_long_enough_1234".into(), 30, false),
            Arc::new(db),
        )
    }

    fn account(role: UserRole) -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            name: "Asha".into(),
            email: "asha@example.com".into(),
            password_hash: String::new(),
            role,
            phone: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trip_keeps_subject_and_role() {
        let svc = service();
        let user = account(UserRole::Seller);
        let token = svc.generate_token(&user).unwrap();
        let claims = svc.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, "seller");
        assert_eq!(claims.exp - claims.iat, 30 * 24 * 3600);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let svc = service();
        let other = AuthService {
            config: AuthConfig::new("another_secret_that_is_also_long_enough_9".into(), 30, false),
            db: svc.db.clone(),
        };
        let token = other.generate_token(&account(UserRole::Buyer)).unwrap();
        assert!(matches!(
            svc.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let svc = service();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "buyer".into(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(svc.config.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            svc.validate_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn password_hash_verifies() {
        let svc = service();
        let hash = svc.hash_password("hunter22").unwrap();
        assert!(svc.verify_password("hunter22", &hash).is_ok());
        assert!(matches!(
            svc.verify_password("wrong", &hash),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn token_is_read_from_cookie_before_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; token=cookie-token"),
        );
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("cookie-token"));

        headers.remove(header::COOKIE);
        assert_eq!(extract_token(&headers).as_deref(), Some("header-token"));
    }

    #[test]
    fn cleared_cookie_is_not_a_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("token=none"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn session_cookie_is_http_only() {
        let svc = service();
        let cookie = svc.session_cookie("abc");
        assert!(cookie.starts_with("token=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains(&format!("Max-Age={}", 30 * 24 * 3600)));
        assert!(!cookie.contains("Secure"));
    }
}
