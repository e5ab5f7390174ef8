use crate::{
    entities::notification::{
        self, Entity as NotificationEntity, NotificationPriority, NotificationType, SentVia,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{ConnectionRegistry, PushMessage},
    services::settings::find_settings,
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;

/// Contents of a notification before it is addressed to a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub related_order: Option<Uuid>,
    #[serde(default)]
    pub related_product: Option<Uuid>,
    #[serde(default)]
    pub priority: NotificationPriority,
}

impl NotificationDraft {
    pub fn new(kind: NotificationType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            related_order: None,
            related_product: None,
            priority: NotificationPriority::default(),
        }
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.related_order = Some(order_id);
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    fn into_active(self, user_id: Uuid, sent_via: SentVia) -> notification::ActiveModel {
        notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            notification_type: Set(self.kind),
            title: Set(self.title),
            message: Set(self.message),
            related_order: Set(self.related_order),
            related_product: Set(self.related_product),
            priority: Set(self.priority),
            is_read: Set(false),
            read_at: Set(None),
            sent_via: Set(sent_via),
            created_at: Set(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<notification::Model>,
    pub unread_count: u64,
    pub total_pages: u64,
    pub current_page: u64,
}

/// In-app notifications plus live push through the connection registry.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    registry: Arc<ConnectionRegistry>,
    event_sender: Arc<EventSender>,
}

impl NotificationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<ConnectionRegistry>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            registry,
            event_sender,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stores the notification and fans it out on the channels the user
    /// has enabled. Users without settings get the in-app record only.
    #[instrument(skip(self, draft), fields(kind = draft.kind.as_str()))]
    pub async fn send(
        &self,
        user_id: Uuid,
        draft: NotificationDraft,
    ) -> Result<notification::Model, ServiceError> {
        let kind = draft.kind;
        let mut sent_via = SentVia::default();
        let settings = find_settings(&*self.db, user_id).await?;

        if let Some(settings) = &settings {
            if kind == NotificationType::Order {
                sent_via.email = settings.email_order_updates;
                sent_via.sms = settings.sms_order_updates;
            }
        }

        let mut notification = draft.into_active(user_id, sent_via.clone()).insert(&*self.db).await?;

        if settings.map(|s| s.push_enabled).unwrap_or(false) {
            let delivered = self.registry.push(
                user_id,
                PushMessage {
                    id: notification.id,
                    kind: kind.as_str().to_string(),
                    title: notification.title.clone(),
                    message: notification.message.clone(),
                    timestamp: notification.created_at,
                },
            );
            debug!(%user_id, delivered, "push fan-out");

            sent_via.push = true;
            let mut active: notification::ActiveModel = notification.into();
            active.sent_via = Set(sent_via);
            notification = active.update(&*self.db).await?;
        }

        self.event_sender
            .send_or_log(Event::NotificationSent {
                notification_id: notification.id,
                user_id,
            })
            .await;
        Ok(notification)
    }

    /// Best-effort variant of [`send`](Self::send) for side effects of
    /// other operations. Failures are logged and swallowed.
    pub async fn notify(&self, user_id: Uuid, draft: NotificationDraft) {
        let title = draft.title.clone();
        if let Err(e) = self.send(user_id, draft).await {
            warn!(%user_id, %title, error = %e, "notification failed");
        }
    }

    /// In-app records only; no settings lookup and no push.
    #[instrument(skip(self, user_ids, draft), fields(recipients = user_ids.len()))]
    pub async fn send_bulk(
        &self,
        user_ids: &[Uuid],
        draft: NotificationDraft,
    ) -> Result<usize, ServiceError> {
        if user_ids.is_empty() {
            return Ok(0);
        }
        let rows: Vec<_> = user_ids
            .iter()
            .map(|user_id| draft.clone().into_active(*user_id, SentVia::default()))
            .collect();
        NotificationEntity::insert_many(rows).exec(&*self.db).await?;
        info!(recipients = user_ids.len(), "bulk notifications sent");
        Ok(user_ids.len())
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
    ) -> Result<NotificationPage, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let mut select =
            NotificationEntity::find().filter(notification::Column::UserId.eq(user_id));
        if query.unread_only {
            select = select.filter(notification::Column::IsRead.eq(false));
        }

        let total = select.clone().count(&*self.db).await?;
        let notifications = select
            .order_by_desc(notification::Column::CreatedAt)
            .offset((page - 1) * limit)
            .limit(limit)
            .all(&*self.db)
            .await?;

        Ok(NotificationPage {
            notifications,
            unread_count: self.unread_count(user_id).await?,
            total_pages: total.div_ceil(limit),
            current_page: page,
        })
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        Ok(NotificationEntity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .count(&*self.db)
            .await?)
    }

    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let notification = self.find_owned(user_id, id).await?;
        if notification.is_read {
            return Ok(());
        }
        let mut active: notification::ActiveModel = notification.into();
        active.is_read = Set(true);
        active.read_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = NotificationEntity::update_many()
            .col_expr(notification::Column::IsRead, Expr::value(true))
            .col_expr(notification::Column::ReadAt, Expr::value(Some(Utc::now())))
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let notification = self.find_owned(user_id, id).await?;
        notification.delete(&*self.db).await?;
        Ok(())
    }

    pub async fn clear_all(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = NotificationEntity::delete_many()
            .filter(notification::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Deletes read notifications older than `days`.
    #[instrument(skip(self))]
    pub async fn clear_old(&self, days: i64) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        let result = NotificationEntity::delete_many()
            .filter(notification::Column::CreatedAt.lt(cutoff))
            .filter(notification::Column::IsRead.eq(true))
            .exec(&*self.db)
            .await?;
        info!(deleted = result.rows_affected, days, "cleared old notifications");
        Ok(result.rows_affected)
    }

    async fn find_owned(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<notification::Model, ServiceError> {
        NotificationEntity::find_by_id(id)
            .filter(notification::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Notification not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_deserializes_type_field() {
        let draft: NotificationDraft = serde_json::from_str(
            r#"{"type":"promotion","title":"Sale","message":"50% off"}"#,
        )
        .unwrap();
        assert_eq!(draft.kind, NotificationType::Promotion);
        assert_eq!(draft.priority, NotificationPriority::Medium);
        assert!(draft.related_order.is_none());
    }

    #[test]
    fn builder_sets_order_and_priority() {
        let order_id = Uuid::new_v4();
        let draft = NotificationDraft::new(NotificationType::Order, "Order Confirmed", "ok")
            .for_order(order_id)
            .with_priority(NotificationPriority::High);
        assert_eq!(draft.related_order, Some(order_id));
        assert_eq!(draft.priority, NotificationPriority::High);
    }
}
