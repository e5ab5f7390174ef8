use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    routing::{delete, get, put},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{ack, message_response, success_response},
    notifications::Subscription,
    services::notifications::NotificationQuery,
    AppState,
};

pub fn notifications_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", put(mark_all_read))
        .route("/:id/read", put(mark_read))
        .route("/clear-all", delete(clear_all))
        .route("/:id", delete(delete_notification))
        .route("/stream", get(notification_stream))
        .with_role("buyer")
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Response, ServiceError> {
    let page = state
        .services
        .notifications
        .list(user.user_id, query)
        .await?;
    Ok(success_response(page))
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let count = state
        .services
        .notifications
        .unread_count(user.user_id)
        .await?;
    Ok(success_response(json!({ "unreadCount": count })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state
        .services
        .notifications
        .mark_read(user.user_id, id)
        .await?;
    Ok(ack("Notification marked as read"))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let updated = state
        .services
        .notifications
        .mark_all_read(user.user_id)
        .await?;
    Ok(message_response(
        "All notifications marked as read",
        json!({ "updated": updated }),
    ))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state
        .services
        .notifications
        .delete(user.user_id, id)
        .await?;
    Ok(ack("Notification deleted"))
}

pub async fn clear_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let deleted = state
        .services
        .notifications
        .clear_all(user.user_id)
        .await?;
    Ok(message_response(
        "All notifications cleared",
        json!({ "deleted": deleted }),
    ))
}

/// Server-sent push for the caller. The subscription is released when the
/// client disconnects and the stream is dropped.
pub async fn notification_stream(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state
        .services
        .notifications
        .registry()
        .subscribe(user.user_id);
    debug!(user_id = %user.user_id, "push stream opened");

    let hello = stream::once(async {
        Ok(Event::default().event("connected").data("connected"))
    });
    Sse::new(hello.chain(push_events(subscription))).keep_alive(KeepAlive::default())
}

fn push_events(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut sub| async move {
        let message = sub.recv().await?;
        let event = Event::default()
            .event("notification")
            .json_data(&message)
            .unwrap_or_else(|_| Event::default().event("notification").data(message.title.clone()));
        Some((Ok(event), sub))
    })
}
