use crate::{
    auth::{AuthError, AuthService},
    entities::user::{self, Entity as UserEntity, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginInput {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Which front end a login comes from. The storefront only admits buyers;
/// the seller panel admits sellers and admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginAudience {
    Storefront,
    Panel,
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&user::Model> for UserProfile {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            phone: user.phone.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

/// A user together with a freshly signed session token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: user::Model,
    pub token: String,
}

/// Registration, login and profile management.
#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
    event_sender: Arc<EventSender>,
}

impl AccountService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        auth: Arc<AuthService>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            auth,
            event_sender,
        }
    }

    /// Creates a buyer or seller account and signs it in.
    #[instrument(skip(self, input), fields(email = ?input.email))]
    pub async fn register(&self, input: RegisterInput) -> Result<Session, ServiceError> {
        let (name, email, password) = match (
            non_empty(input.name),
            non_empty(input.email),
            input.password.filter(|p| !p.is_empty()),
        ) {
            (Some(name), Some(email), Some(password)) => (name, email, password),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Please provide name, email, and password".into(),
                ))
            }
        };

        let email = email.to_lowercase();
        if !validator::validate_email(email.as_str()) {
            return Err(ServiceError::BadRequest(
                "Please provide a valid email address".into(),
            ));
        }

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::BadRequest(
                "Password must be at least 6 characters".into(),
            ));
        }

        let role = match input.role.as_deref() {
            None | Some("") => UserRole::Buyer,
            Some("buyer") => UserRole::Buyer,
            Some("seller") => UserRole::Seller,
            Some(_) => {
                return Err(ServiceError::BadRequest(
                    "Role must be either \"buyer\" or \"seller\"".into(),
                ))
            }
        };

        if self.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::BadRequest(
                "User already exists with this email".into(),
            ));
        }

        let password_hash = self.auth.hash_password(&password)?;
        let now = Utc::now();
        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(role),
            phone: Set(non_empty(input.phone)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(user_id = %user.id, role = user.role.as_str(), "user registered");
        self.event_sender
            .send_or_log(Event::UserRegistered(user.id))
            .await;

        let token = self.auth.generate_token(&user)?;
        Ok(Session { user, token })
    }

    /// Verifies credentials for the given front end.
    #[instrument(skip(self, input))]
    pub async fn login(
        &self,
        input: LoginInput,
        audience: LoginAudience,
    ) -> Result<Session, ServiceError> {
        let (email, password) = match (non_empty(input.email), input.password) {
            (Some(email), Some(password)) if !password.is_empty() => (email, password),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Please provide email and password".into(),
                ))
            }
        };

        let user = self
            .find_by_email(&email.to_lowercase())
            .await?
            .ok_or_else(|| ServiceError::Unauthorized(AuthError::InvalidCredentials.to_string()))?;

        if !user.is_active {
            return Err(ServiceError::Unauthorized(
                "Account has been deactivated. Please contact support.".into(),
            ));
        }

        self.auth
            .verify_password(&password, &user.password_hash)
            .map_err(|_| ServiceError::Unauthorized(AuthError::InvalidCredentials.to_string()))?;

        match (audience, user.role) {
            (LoginAudience::Storefront, UserRole::Seller | UserRole::Admin) => {
                warn!(user_id = %user.id, "panel account blocked from storefront login");
                return Err(ServiceError::Forbidden(
                    "Sellers and admins cannot access the buyer frontend. Please use the admin panel."
                        .into(),
                ));
            }
            (LoginAudience::Panel, UserRole::Buyer) => {
                return Err(ServiceError::Forbidden(
                    "Buyers cannot access the seller panel".into(),
                ));
            }
            _ => {}
        }

        info!(user_id = %user.id, "login succeeded");
        let token = self.auth.generate_token(&user)?;
        Ok(Session { user, token })
    }

    /// Resolves a token without failing; `None` for anything unusable.
    pub async fn check(&self, token: Option<&str>) -> Option<user::Model> {
        let claims = self.auth.validate_token(token?).ok()?;
        let user_id = Uuid::parse_str(&claims.sub).ok()?;
        match UserEntity::find_by_id(user_id).one(&*self.db).await {
            Ok(Some(user)) if user.is_active => Some(user),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "auth check lookup failed");
                None
            }
        }
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        UserEntity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))
    }

    #[instrument(skip(self, input))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        input: UpdateProfileInput,
    ) -> Result<user::Model, ServiceError> {
        let user = self.profile(user_id).await?;
        let mut active: user::ActiveModel = user.clone().into();

        if let Some(email) = non_empty(input.email).map(|e| e.to_lowercase()) {
            if email != user.email {
                if !validator::validate_email(email.as_str()) {
                    return Err(ServiceError::BadRequest(
                        "Please provide a valid email address".into(),
                    ));
                }
                if self.find_by_email(&email).await?.is_some() {
                    return Err(ServiceError::BadRequest("Email is already in use".into()));
                }
                active.email = Set(email);
            }
        }
        if let Some(name) = non_empty(input.name) {
            active.name = Set(name);
        }
        if let Some(phone) = non_empty(input.phone) {
            active.phone = Set(Some(phone));
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self, input))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        input: ChangePasswordInput,
    ) -> Result<(), ServiceError> {
        let (current, new) = match (input.current_password, input.new_password) {
            (Some(c), Some(n)) if !c.is_empty() && !n.is_empty() => (c, n),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Please provide current and new password".into(),
                ))
            }
        };

        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::BadRequest(
                "New password must be at least 6 characters".into(),
            ));
        }

        let user = self.profile(user_id).await?;
        self.auth
            .verify_password(&current, &user.password_hash)
            .map_err(|_| ServiceError::Unauthorized("Current password is incorrect".into()))?;

        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(self.auth.hash_password(&new)?);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        info!(%user_id, "password changed");
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, ServiceError> {
        Ok(UserEntity::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await?)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
