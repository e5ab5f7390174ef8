use crate::{
    entities::{
        notification::{NotificationPriority, NotificationType},
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        payment::{self, Entity as PaymentEntity, PaymentRecordStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    services::{
        cart::{delete_cart, load_cart},
        notifications::NotificationDraft,
        orders::{decrement_stock, OrderEffects},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Fields posted back by the checkout widget after a successful payment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyPaymentInput {
    #[serde(default)]
    pub razorpay_order_id: String,
    #[serde(default)]
    pub razorpay_payment_id: String,
    #[serde(default)]
    pub razorpay_signature: String,
    #[serde(rename = "orderId")]
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayFailure {
    pub description: Option<String>,
    pub code: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFailureInput {
    #[serde(default)]
    pub razorpay_order_id: String,
    pub error: Option<GatewayFailure>,
}

/// Second phase of online checkout: settles a pending payment as verified
/// or failed.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    effects: OrderEffects,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        effects: OrderEffects,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            effects,
        }
    }

    /// Confirms the order behind a gateway payment.
    ///
    /// The signature is checked before anything is read or written. A
    /// payment that is already completed returns its order unchanged.
    #[instrument(skip(self, input), fields(gateway_order_id = %input.razorpay_order_id))]
    pub async fn verify(
        &self,
        user_id: Uuid,
        input: VerifyPaymentInput,
    ) -> Result<order::Model, ServiceError> {
        if !self.gateway.verify_signature(
            &input.razorpay_order_id,
            &input.razorpay_payment_id,
            &input.razorpay_signature,
        ) {
            warn!(%user_id, "payment signature mismatch");
            return Err(ServiceError::BadRequest("Payment verification failed".into()));
        }

        let txn = self.db.begin().await?;

        let payment = PaymentEntity::find()
            .filter(payment::Column::GatewayOrderId.eq(input.razorpay_order_id.as_str()))
            .filter(payment::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .filter(|p| input.order_id.map_or(true, |id| id == p.order_id))
            .ok_or_else(|| ServiceError::NotFound("Payment record not found".into()))?;

        let order = OrderEntity::find_by_id(payment.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;

        if payment.status == PaymentRecordStatus::Completed {
            info!(order_id = %order.id, "payment already verified");
            return Ok(order);
        }

        if !matches!(
            order.order_status,
            OrderStatus::Pending | OrderStatus::PaymentFailed
        ) {
            warn!(order_id = %order.id, status = %order.order_status, "payment for a settled order");
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot verify payment for a {} order",
                order.order_status
            )));
        }

        let now = Utc::now();
        let amount = payment.amount;
        let payment_id = payment.id;
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentRecordStatus::Completed);
        active.gateway_payment_id = Set(Some(input.razorpay_payment_id.clone()));
        active.gateway_signature = Set(Some(input.razorpay_signature.clone()));
        active.transaction_id = Set(Some(input.razorpay_payment_id.clone()));
        active.failure_reason = Set(None);
        active.paid_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let mut active: order::ActiveModel = order.clone().into();
        active.payment_status = Set(PaymentStatus::Completed);
        active.order_status = Set(OrderStatus::Confirmed);
        active.status_history = Set(order::Model::push_history(
            &order.status_history,
            OrderStatus::Confirmed,
            "Payment successful - Order confirmed",
        ));
        active.updated_at = Set(now);
        let order = active.update(&txn).await?;

        // The buyer has paid, so a shortfall cannot undo the order.
        let shortfalls = decrement_stock(&txn, &order.items.0).await?;

        let cart = load_cart(&txn, user_id).await?;
        if let Some(cart) = &cart {
            delete_cart(&txn, cart.cart.id).await?;
        }
        txn.commit().await?;

        info!(order_id = %order.id, %payment_id, "payment verified");
        self.event_sender
            .send_or_log(Event::PaymentVerified {
                order_id: order.id,
                payment_id,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderConfirmed(order.id))
            .await;
        for item in &order.items.0 {
            let event = if shortfalls.iter().any(|s| s.product == item.product) {
                Event::StockShortfall {
                    product_id: item.product,
                    requested: item.quantity,
                }
            } else {
                Event::StockDecremented {
                    product_id: item.product,
                    quantity: item.quantity,
                }
            };
            self.event_sender.send_or_log(event).await;
        }
        if cart.is_some() {
            self.event_sender.send_or_log(Event::CartCleared(user_id)).await;
        }

        self.effects
            .notify(
                user_id,
                NotificationDraft::new(
                    NotificationType::Payment,
                    "Payment Successful",
                    format!("Payment of ₹{} completed successfully", amount.normalize()),
                )
                .for_order(order.id),
            )
            .await;
        self.effects.order_confirmed(&order).await;

        Ok(order)
    }

    /// Records a failure reported by the checkout widget. Unknown gateway
    /// orders are ignored.
    #[instrument(skip(self, input), fields(gateway_order_id = %input.razorpay_order_id))]
    pub async fn record_failure(
        &self,
        user_id: Uuid,
        input: PaymentFailureInput,
    ) -> Result<(), ServiceError> {
        let payment = match PaymentEntity::find()
            .filter(payment::Column::GatewayOrderId.eq(input.razorpay_order_id.as_str()))
            .filter(payment::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        {
            Some(payment) => payment,
            None => {
                warn!(%user_id, "payment failure for unknown gateway order");
                return Ok(());
            }
        };

        if payment.status == PaymentRecordStatus::Completed {
            warn!(payment_id = %payment.id, "failure reported for a completed payment");
            return Ok(());
        }

        let reason = input
            .error
            .and_then(|e| e.description)
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "Payment failed".into());

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = payment.order_id;
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentRecordStatus::Failed);
        active.failure_reason = Set(Some(reason.clone()));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let order = OrderEntity::find_by_id(order_id).one(&txn).await?;
        if let Some(order) = &order {
            let mut active: order::ActiveModel = order.clone().into();
            active.payment_status = Set(PaymentStatus::Failed);
            if order.order_status == OrderStatus::Pending {
                active.order_status = Set(OrderStatus::PaymentFailed);
                active.status_history = Set(order::Model::push_history(
                    &order.status_history,
                    OrderStatus::PaymentFailed,
                    "Payment failed",
                ));
            }
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }
        txn.commit().await?;

        info!(%order_id, %reason, "payment failure recorded");
        self.event_sender
            .send_or_log(Event::PaymentFailed { order_id, reason })
            .await;

        let mut draft = NotificationDraft::new(
            NotificationType::Payment,
            "Payment Failed",
            "Your payment could not be processed. Please try again.",
        )
        .with_priority(NotificationPriority::High);
        if order.is_some() {
            draft = draft.for_order(order_id);
        }
        self.effects.notify(user_id, draft).await;

        Ok(())
    }
}
