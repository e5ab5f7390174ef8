mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use bazaar_api::{
    entities::notification::{self, NotificationPriority, NotificationType, SentVia},
    services::{notifications::NotificationDraft, settings::NotificationPreferences},
};
use chrono::Utc;
use common::TestApp;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use uuid::Uuid;

fn promo(title: &str) -> NotificationDraft {
    NotificationDraft::new(NotificationType::Promotion, title, "Weekend sale")
}

#[tokio::test]
async fn bulk_send_reaches_every_recipient() {
    let app = TestApp::new().await;
    let first = app.buyer().await;
    let second = app.buyer().await;

    let sent = app
        .state
        .services
        .notifications
        .send_bulk(&[first.id(), second.id()], promo("Sale"))
        .await
        .expect("bulk send");
    assert_eq!(sent, 2);

    for user in [&first, &second] {
        let (status, body) = app
            .get("/api/notifications/unread-count", Some(&user.token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unreadCount"], 1);
    }

    let empty = app
        .state
        .services
        .notifications
        .send_bulk(&[], promo("Nobody"))
        .await
        .expect("empty bulk send");
    assert_eq!(empty, 0);
}

#[tokio::test]
async fn read_state_and_unread_filter() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;
    let notifications = &app.state.services.notifications;

    let first = notifications
        .send(buyer.id(), promo("First"))
        .await
        .expect("send first");
    notifications
        .send(buyer.id(), promo("Second"))
        .await
        .expect("send second");

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/notifications/{}/read", first.id),
            None,
            Some(&buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .get("/api/notifications?unreadOnly=true", Some(&buyer.token))
        .await;
    let unread = body["notifications"].as_array().expect("notifications");
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0]["title"], "Second");
    assert_eq!(body["unreadCount"], 1);

    let (_, body) = app
        .call(Method::PUT, "/api/notifications/read-all", None, Some(&buyer.token))
        .await;
    assert_eq!(body["updated"], 1);

    let (_, body) = app.get("/api/notifications", Some(&buyer.token)).await;
    assert_eq!(body["notifications"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["unreadCount"], 0);
}

#[tokio::test]
async fn other_users_notifications_are_not_found() {
    let app = TestApp::new().await;
    let owner = app.buyer().await;
    let stranger = app.buyer().await;

    let sent = app
        .state
        .services
        .notifications
        .send(owner.id(), promo("Private"))
        .await
        .expect("send");

    let (status, body) = app
        .call(
            Method::DELETE,
            &format!("/api/notifications/{}", sent.id),
            None,
            Some(&stranger.token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Notification not found");

    let (_, body) = app
        .call(Method::DELETE, "/api/notifications/clear-all", None, Some(&owner.token))
        .await;
    assert_eq!(body["deleted"], 1);
}

#[tokio::test]
async fn push_follows_user_settings() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;
    let notifications = &app.state.services.notifications;

    // No settings row yet: in-app only.
    let mut subscription = notifications.registry().subscribe(buyer.id());
    let quiet = notifications
        .send(buyer.id(), promo("Quiet"))
        .await
        .expect("send without settings");
    assert!(!quiet.sent_via.push);

    app.state
        .services
        .settings
        .update_notifications(
            buyer.id(),
            NotificationPreferences {
                push_enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .expect("enable push");

    let loud = notifications
        .send(buyer.id(), promo("Loud"))
        .await
        .expect("send with push");
    assert!(loud.sent_via.push);

    let pushed = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("push within a second")
        .expect("open channel");
    assert_eq!(pushed.id, loud.id);
    assert_eq!(pushed.kind, "promotion");

    drop(subscription);
    assert!(!notifications.registry().is_connected(buyer.id()));
}

#[tokio::test]
async fn sweep_removes_only_old_read_notifications() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;
    let db = &*app.state.db;

    let insert = |title: &str, is_read: bool, age_days: i64| notification::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(buyer.id()),
        notification_type: Set(NotificationType::System),
        title: Set(title.to_string()),
        message: Set("maintenance".into()),
        related_order: Set(None),
        related_product: Set(None),
        priority: Set(NotificationPriority::Low),
        is_read: Set(is_read),
        read_at: Set(is_read.then(Utc::now)),
        sent_via: Set(SentVia::default()),
        created_at: Set(Utc::now() - chrono::Duration::days(age_days)),
    };

    insert("old read", true, 60).insert(db).await.expect("old read");
    insert("old unread", false, 60).insert(db).await.expect("old unread");
    insert("fresh read", true, 1).insert(db).await.expect("fresh read");

    let removed = app
        .state
        .services
        .notifications
        .clear_old(30)
        .await
        .expect("sweep");
    assert_eq!(removed, 1);

    let titles: Vec<String> = notification::Entity::find()
        .all(db)
        .await
        .expect("remaining")
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(!titles.iter().any(|t| t == "old read"));
}

#[tokio::test]
async fn settings_defaults_and_partial_update() {
    let app = TestApp::new().await;
    let buyer = app.buyer().await;

    let (status, body) = app.get("/api/settings", Some(&buyer.token)).await;
    assert_eq!(status, StatusCode::OK);
    let settings: &Value = &body["settings"];
    assert_eq!(settings["pushEnabled"], true);
    assert_eq!(settings["smsOrderUpdates"], false);

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/settings/notifications",
            Some(serde_json::json!({ "smsOrderUpdates": true })),
            Some(&buyer.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["settings"]["smsOrderUpdates"], true);
    assert_eq!(body["settings"]["pushEnabled"], true);
}
