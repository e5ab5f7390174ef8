//! Delivery channels for notifications.
//!
//! The in-app record lives in the database (see
//! [`crate::services::notifications`]). This module holds the live push
//! registry used by the server-sent event stream and the mailer used for
//! order confirmations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderItem;

const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Payload pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Live subscribers per user.
///
/// Each user gets one broadcast channel shared by all of their open
/// streams. The channel is removed once its last subscription is dropped.
#[derive(Debug)]
pub struct ConnectionRegistry {
    channels: DashMap<Uuid, broadcast::Sender<PushMessage>>,
    capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Opens a subscription for `user_id`. Dropping it unsubscribes.
    pub fn subscribe(self: &Arc<Self>, user_id: Uuid) -> Subscription {
        let receiver = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(%user_id, "push subscriber connected");
        Subscription {
            user_id,
            receiver: Some(receiver),
            registry: Arc::clone(self),
        }
    }

    /// Drops the user's channel when nobody is listening anymore.
    pub fn unsubscribe(&self, user_id: Uuid) {
        if self
            .channels
            .remove_if(&user_id, |_, tx| tx.receiver_count() == 0)
            .is_some()
        {
            debug!(%user_id, "last push subscriber disconnected");
        }
    }

    /// Delivers to every live subscriber of the user. Returns how many
    /// received it; zero when the user is offline.
    pub fn push(&self, user_id: Uuid, message: PushMessage) -> usize {
        match self.channels.get(&user_id) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.channels
            .get(&user_id)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    pub fn connected_users(&self) -> usize {
        self.channels.len()
    }
}

/// A live push subscription.
pub struct Subscription {
    user_id: Uuid,
    receiver: Option<broadcast::Receiver<PushMessage>>,
    registry: Arc<ConnectionRegistry>,
}

impl Subscription {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Next message, skipping over any the subscriber lagged behind on.
    /// `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(user_id = %self.user_id, skipped, "push subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.registry.unsubscribe(self.user_id);
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Order confirmation mail contents.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderConfirmationEmail {
    pub to: String,
    pub customer_name: String,
    pub order_number: String,
    pub items: Vec<OrderItem>,
    pub total: Decimal,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_order_confirmation(&self, email: OrderConfirmationEmail)
        -> Result<(), MailError>;
}

/// Mailer that only writes to the log. Used until a real transport is wired.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_order_confirmation(
        &self,
        email: OrderConfirmationEmail,
    ) -> Result<(), MailError> {
        info!(
            to = %email.to,
            order_number = %email.order_number,
            items = email.items.len(),
            total = %email.total,
            "order confirmation email"
        );
        Ok(())
    }
}

/// Sends the confirmation in the background. Failures are logged only.
pub fn dispatch_order_confirmation(
    mailer: Arc<dyn Mailer>,
    email: OrderConfirmationEmail,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let order_number = email.order_number.clone();
        if let Err(e) = mailer.send_order_confirmation(email).await {
            warn!(%order_number, error = %e, "order confirmation email failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(title: &str) -> PushMessage {
        PushMessage {
            id: Uuid::new_v4(),
            kind: "order".into(),
            title: title.into(),
            message: "body".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn push_reaches_every_subscription_of_the_user() {
        let registry = Arc::new(ConnectionRegistry::default());
        let user = Uuid::new_v4();
        let mut first = registry.subscribe(user);
        let mut second = registry.subscribe(user);

        assert_eq!(registry.push(user, message("Order Confirmed")), 2);
        assert_eq!(first.recv().await.unwrap().title, "Order Confirmed");
        assert_eq!(second.recv().await.unwrap().title, "Order Confirmed");
    }

    #[tokio::test]
    async fn push_to_offline_user_is_dropped() {
        let registry = Arc::new(ConnectionRegistry::default());
        assert_eq!(registry.push(Uuid::new_v4(), message("x")), 0);
    }

    #[tokio::test]
    async fn channel_is_removed_after_last_subscription_drops() {
        let registry = Arc::new(ConnectionRegistry::default());
        let user = Uuid::new_v4();

        let first = registry.subscribe(user);
        let second = registry.subscribe(user);
        assert!(registry.is_connected(user));

        drop(first);
        assert_eq!(registry.connected_users(), 1);

        drop(second);
        assert!(!registry.is_connected(user));
        assert_eq!(registry.connected_users(), 0);
    }

    #[tokio::test]
    async fn mailer_failure_is_swallowed() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send_order_confirmation()
            .times(1)
            .returning(|_| Err(MailError::Transport("smtp down".into())));

        let email = OrderConfirmationEmail {
            to: "buyer@example.com".into(),
            customer_name: "Buyer".into(),
            order_number: "ORD-20240101-ABCDEF".into(),
            items: Vec::new(),
            total: Decimal::new(70800, 2),
            estimated_delivery: None,
        };

        dispatch_order_confirmation(Arc::new(mailer), email)
            .await
            .unwrap();
    }
}
