use crate::{
    entities::user_settings::{self, Entity as SettingsEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub push_enabled: Option<bool>,
    pub email_order_updates: Option<bool>,
    pub sms_order_updates: Option<bool>,
    pub promotional_emails: Option<bool>,
}

/// Reads settings without creating them.
pub async fn find_settings<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<user_settings::Model>, ServiceError> {
    Ok(SettingsEntity::find()
        .filter(user_settings::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

#[derive(Clone)]
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the user's settings, creating the defaults on first access.
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<user_settings::Model, ServiceError> {
        if let Some(settings) = find_settings(&*self.db, user_id).await? {
            return Ok(settings);
        }

        let now = Utc::now();
        Ok(user_settings::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            push_enabled: Set(true),
            email_order_updates: Set(true),
            sms_order_updates: Set(false),
            promotional_emails: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?)
    }

    #[instrument(skip(self, prefs))]
    pub async fn update_notifications(
        &self,
        user_id: Uuid,
        prefs: NotificationPreferences,
    ) -> Result<user_settings::Model, ServiceError> {
        let settings = self.get_or_create(user_id).await?;
        let mut active: user_settings::ActiveModel = settings.into();

        if let Some(v) = prefs.push_enabled {
            active.push_enabled = Set(v);
        }
        if let Some(v) = prefs.email_order_updates {
            active.email_order_updates = Set(v);
        }
        if let Some(v) = prefs.sms_order_updates {
            active.sms_order_updates = Set(v);
        }
        if let Some(v) = prefs.promotional_emails {
            active.promotional_emails = Set(v);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }
}
