use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted by the marketplace services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered(Uuid),
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),
    CartUpdated {
        user_id: Uuid,
        total_items: i32,
    },
    CartCleared(Uuid),
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
    },
    OrderConfirmed(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentVerified {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
    },
    StockShortfall {
        product_id: Uuid,
        requested: i32,
    },
    CouponRedeemed(String),
    ReviewCreated {
        review_id: Uuid,
        product_id: Uuid,
    },
    ReviewUpdated(Uuid),
    ReviewDeleted(Uuid),
    NotificationSent {
        notification_id: Uuid,
        user_id: Uuid,
    },
}

/// Drains the event channel, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockShortfall {
                product_id,
                requested,
            } => {
                warn!(%product_id, requested, "stock shortfall while confirming order");
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!(%order_id, %reason, "payment failed");
            }
            Event::OrderPlaced { .. }
            | Event::OrderConfirmed(_)
            | Event::OrderCancelled(_)
            | Event::OrderStatusChanged { .. }
            | Event::PaymentVerified { .. } => {
                info!(?event, "order event");
            }
            _ => debug!(?event, "event"),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();

        sender.send_or_log(Event::OrderConfirmed(order_id)).await;
        sender.send_or_log(Event::OrderCancelled(order_id)).await;

        assert_eq!(rx.recv().await, Some(Event::OrderConfirmed(order_id)));
        assert_eq!(rx.recv().await, Some(Event::OrderCancelled(order_id)));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::CartCleared(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }
}
