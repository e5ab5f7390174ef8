use crate::{
    config::PricingConfig,
    entities::{
        coupon::{self, Entity as CouponEntity},
        notification::{NotificationPriority, NotificationType},
        order::{
            self, Entity as OrderEntity, OrderItem, OrderItems, OrderStatus, PaymentMethod,
            PaymentStatus, ShippingAddress, StatusEntry, StatusHistory,
        },
        payment::{self, PaymentGateway as GatewayKind, PaymentRecordStatus},
        product::{self, Entity as ProductEntity},
        user::Entity as UserEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{to_minor_units, PaymentGateway, RemoteOrder},
    notifications::{dispatch_order_confirmation, Mailer, OrderConfirmationEmail},
    services::{
        addresses::find_owned as find_address,
        cart::{delete_cart, load_cart},
        checkout::snapshot_lines,
        coupons::applicable_coupon,
        notifications::{NotificationDraft, NotificationService},
        pricing::PricingRules,
    },
};
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderInput {
    pub address_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub coupon_code: Option<String>,
}

/// Outcome of placing an order.
#[derive(Debug, Clone)]
pub enum Placement {
    /// Confirmed in the same request; payment is collected on delivery.
    CashOnDelivery(order::Model),
    /// Waiting for the client to pay against `gateway_order`.
    Online {
        order: order::Model,
        gateway_order: RemoteOrder,
        key_id: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelInput {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateInput {
    pub status: OrderStatus,
    pub note: Option<String>,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTracking {
    pub order_number: String,
    pub current_status: OrderStatus,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub history: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub order_number: String,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

/// Allowed admin status changes.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Cancelled)
            | (Pending, PaymentFailed)
            | (Confirmed, Processing)
            | (Confirmed, Shipped)
            | (Confirmed, Cancelled)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, Delivered)
            | (PaymentFailed, Pending)
    )
}

/// Buyers may cancel until the order is being processed.
pub fn is_cancellable(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Pending | OrderStatus::Confirmed)
}

/// `ORD-YYYYMMDD-XXXXXX` with a random upper-case alphanumeric suffix.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Takes each line's quantity out of stock, never below zero.
///
/// Returns the lines that could not be covered: the product is gone or
/// has less stock than the line asks for. Those products are left as is.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    items: &[OrderItem],
) -> Result<Vec<OrderItem>, ServiceError> {
    let mut shortfalls = Vec::new();
    for item in items {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(item.quantity),
            )
            .col_expr(
                product::Column::SoldCount,
                Expr::col(product::Column::SoldCount).add(item.quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(item.product))
            .filter(product::Column::Stock.gte(item.quantity))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            shortfalls.push(item.clone());
        }
    }
    Ok(shortfalls)
}

/// Side effects that follow a confirmed order. Every method here is
/// best-effort: failures are logged and never returned.
#[derive(Clone)]
pub struct OrderEffects {
    db: Arc<DatabaseConnection>,
    notifications: NotificationService,
    mailer: Arc<dyn Mailer>,
}

impl OrderEffects {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifications: NotificationService,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            db,
            notifications,
            mailer,
        }
    }

    pub async fn notify(&self, user_id: Uuid, draft: NotificationDraft) {
        self.notifications.notify(user_id, draft).await;
    }

    /// "Order Confirmed" notification plus the confirmation email.
    pub async fn order_confirmed(&self, order: &order::Model) {
        self.notify(
            order.user_id,
            NotificationDraft::new(
                NotificationType::Order,
                "Order Confirmed",
                format!("Your order #{} has been confirmed", order.order_number),
            )
            .for_order(order.id)
            .with_priority(NotificationPriority::High),
        )
        .await;

        match UserEntity::find_by_id(order.user_id).one(&*self.db).await {
            Ok(Some(user)) => {
                dispatch_order_confirmation(
                    self.mailer.clone(),
                    OrderConfirmationEmail {
                        to: user.email,
                        customer_name: user.name,
                        order_number: order.order_number.clone(),
                        items: order.items.0.clone(),
                        total: order.total_price,
                        estimated_delivery: order.estimated_delivery_date,
                    },
                );
            }
            Ok(None) => warn!(order_id = %order.id, "no user for confirmation email"),
            Err(e) => warn!(order_id = %order.id, error = %e, "confirmation email skipped"),
        }
    }
}

/// Order placement and the buyer's order history.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    effects: OrderEffects,
    rules: PricingRules,
    currency: String,
    delivery_days: i64,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        effects: OrderEffects,
        pricing: &PricingConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            effects,
            rules: PricingRules::from(pricing),
            currency: pricing.currency.clone(),
            delivery_days: i64::from(pricing.delivery_estimate_days),
        }
    }

    /// Turns the caller's cart into an order.
    ///
    /// Cash on delivery confirms, takes stock and clears the cart in one
    /// transaction. Online methods commit the pending order, then open a
    /// gateway order; a gateway failure leaves the order pending.
    #[instrument(skip(self, input))]
    pub async fn place(&self, user_id: Uuid, input: PlaceOrderInput) -> Result<Placement, ServiceError> {
        let (address_id, method) = match (
            input.address_id,
            input.payment_method.filter(|m| !m.trim().is_empty()),
        ) {
            (Some(address_id), Some(method)) => (address_id, method),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Please provide address and payment method".into(),
                ))
            }
        };

        let txn = self.db.begin().await?;

        let cart = load_cart(&txn, user_id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Cart is empty".into()))?;
        let address = find_address(&txn, user_id, address_id).await?;

        for (line, product) in &cart.lines {
            if let Some(product) = product {
                if product.stock < line.quantity {
                    return Err(ServiceError::InsufficientStock(format!(
                        "Insufficient stock for {}",
                        product.name
                    )));
                }
            }
        }

        let method = PaymentMethod::from_str(method.trim())
            .map_err(|_| ServiceError::BadRequest("Invalid payment method".into()))?;

        let (items, items_price) = snapshot_lines(&cart.lines);
        let coupon = match input.coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(code) => applicable_coupon(&txn, code, items_price).await?,
            None => None,
        };
        let discount = coupon.as_ref().map(|(_, d)| *d).unwrap_or_default();
        let pricing = self.rules.price(items_price, discount);

        if let Some((coupon, _)) = &coupon {
            CouponEntity::update_many()
                .col_expr(
                    coupon::Column::UsedCount,
                    Expr::col(coupon::Column::UsedCount).add(1),
                )
                .filter(coupon::Column::Id.eq(coupon.id))
                .exec(&txn)
                .await?;
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(generate_order_number(now)),
            user_id: Set(user_id),
            items: Set(OrderItems(items)),
            shipping_address: Set(ShippingAddress::from(&address)),
            payment_method: Set(method),
            items_price: Set(pricing.items_price),
            tax_price: Set(pricing.tax_price),
            shipping_price: Set(pricing.shipping_price),
            discount_amount: Set(pricing.discount_amount),
            total_price: Set(pricing.total_price),
            coupon_code: Set(coupon.as_ref().map(|(c, _)| c.code.clone())),
            order_status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            status_history: Set(StatusHistory(vec![StatusEntry {
                status: OrderStatus::Pending,
                note: "Order placed".into(),
                timestamp: now,
            }])),
            tracking_number: Set(None),
            estimated_delivery_date: Set(Some(now + Duration::days(self.delivery_days))),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if method.is_online() {
            txn.commit().await?;
            self.after_placed(&order, coupon.map(|(c, _)| c.code)).await;
            return self.open_gateway_order(order).await;
        }

        let mut active: order::ActiveModel = order.clone().into();
        active.order_status = Set(OrderStatus::Confirmed);
        active.status_history = Set(order::Model::push_history(
            &order.status_history,
            OrderStatus::Confirmed,
            "Order confirmed - Cash on Delivery",
        ));
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        insert_payment(&txn, &order, GatewayKind::Cod, &self.currency, None).await?;

        if let Some(short) = decrement_stock(&txn, &order.items.0).await?.first() {
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient stock for {}",
                short.name
            )));
        }
        delete_cart(&txn, cart.cart.id).await?;
        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, "cash on delivery order confirmed");
        self.after_placed(&order, coupon.map(|(c, _)| c.code)).await;
        self.event_sender
            .send_or_log(Event::OrderConfirmed(order.id))
            .await;
        self.event_sender.send_or_log(Event::CartCleared(user_id)).await;
        for item in &order.items.0 {
            self.event_sender
                .send_or_log(Event::StockDecremented {
                    product_id: item.product,
                    quantity: item.quantity,
                })
                .await;
        }
        self.effects.order_confirmed(&order).await;

        Ok(Placement::CashOnDelivery(order))
    }

    async fn open_gateway_order(&self, order: order::Model) -> Result<Placement, ServiceError> {
        let amount = to_minor_units(order.total_price)?;
        let gateway_order = self
            .gateway
            .create_remote_order(amount, &self.currency, &order.order_number)
            .await?;

        insert_payment(
            &*self.db,
            &order,
            GatewayKind::Razorpay,
            &gateway_order.currency,
            Some(gateway_order.id.clone()),
        )
        .await?;

        info!(
            order_id = %order.id,
            gateway_order_id = %gateway_order.id,
            "online order awaiting payment"
        );
        Ok(Placement::Online {
            order,
            gateway_order,
            key_id: self.gateway.key_id().to_string(),
        })
    }

    async fn after_placed(&self, order: &order::Model, coupon_code: Option<String>) {
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                user_id: order.user_id,
                total: order.total_price,
            })
            .await;
        if let Some(code) = coupon_code {
            self.event_sender.send_or_log(Event::CouponRedeemed(code)).await;
        }
    }

    /// Newest first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))
    }

    /// Stock is not returned to the catalog on cancellation.
    #[instrument(skip(self, input))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        id: Uuid,
        input: CancelInput,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get(user_id, id).await?;
        if !is_cancellable(order.order_status) {
            return Err(ServiceError::InvalidStatus(
                "Order cannot be cancelled at this stage".into(),
            ));
        }

        let note = input
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Cancelled by customer".into());

        let mut active: order::ActiveModel = order.clone().into();
        active.order_status = Set(OrderStatus::Cancelled);
        active.status_history = Set(order::Model::push_history(
            &order.status_history,
            OrderStatus::Cancelled,
            note,
        ));
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;

        info!(order_id = %order.id, "order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled(order.id))
            .await;
        self.effects
            .notify(
                user_id,
                NotificationDraft::new(
                    NotificationType::Order,
                    "Order Cancelled",
                    format!("Your order #{} has been cancelled", order.order_number),
                )
                .for_order(order.id),
            )
            .await;

        Ok(order)
    }

    pub async fn track(&self, user_id: Uuid, id: Uuid) -> Result<OrderTracking, ServiceError> {
        let order = self.get(user_id, id).await?;
        Ok(OrderTracking {
            order_number: order.order_number,
            current_status: order.order_status,
            tracking_number: order.tracking_number,
            estimated_delivery: order.estimated_delivery_date,
            delivered_at: order.delivered_at,
            history: order.status_history.0,
        })
    }

    pub async fn invoice(&self, user_id: Uuid, id: Uuid) -> Result<Invoice, ServiceError> {
        let order = self.get(user_id, id).await?;
        if order.order_status != OrderStatus::Delivered {
            return Err(ServiceError::BadRequest(
                "Invoice is only available for delivered orders".into(),
            ));
        }
        Ok(Invoice {
            order_number: order.order_number,
            order_date: order.created_at,
            items: order.items.0,
            subtotal: order.items_price,
            tax: order.tax_price,
            shipping: order.shipping_price,
            discount: order.discount_amount,
            total: order.total_price,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
        })
    }

    /// Admin status change along the allowed transitions.
    #[instrument(skip(self, input), fields(new_status = %input.status))]
    pub async fn update_status(
        &self,
        id: Uuid,
        input: StatusUpdateInput,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;

        let old_status = order.order_status;
        if !is_valid_transition(old_status, input.status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot change order status from {} to {}",
                old_status, input.status
            )));
        }

        let note = input
            .note
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Status updated to {}", input.status));

        let now = Utc::now();
        let mut active: order::ActiveModel = order.clone().into();
        active.order_status = Set(input.status);
        active.status_history = Set(order::Model::push_history(
            &order.status_history,
            input.status,
            note,
        ));
        if let Some(tracking) = input.tracking_number.filter(|t| !t.trim().is_empty()) {
            active.tracking_number = Set(Some(tracking));
        }
        if input.status == OrderStatus::Delivered {
            active.delivered_at = Set(Some(now));
            if order.payment_method == PaymentMethod::Cod {
                active.payment_status = Set(PaymentStatus::Completed);
            }
        }
        active.updated_at = Set(now);
        let order = active.update(&*self.db).await?;

        info!(order_id = %order.id, from = %old_status, to = %order.order_status, "order status changed");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: old_status.to_string(),
                new_status: order.order_status.to_string(),
            })
            .await;
        self.effects
            .notify(
                order.user_id,
                NotificationDraft::new(
                    NotificationType::Order,
                    "Order Update",
                    format!(
                        "Your order #{} is now {}",
                        order.order_number,
                        order.order_status.as_str().replace('_', " ")
                    ),
                )
                .for_order(order.id),
            )
            .await;

        Ok(order)
    }
}

async fn insert_payment<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    gateway: GatewayKind,
    currency: &str,
    gateway_order_id: Option<String>,
) -> Result<payment::Model, ServiceError> {
    let now = Utc::now();
    Ok(payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(order.user_id),
        order_id: Set(order.id),
        payment_method: Set(order.payment_method),
        payment_gateway: Set(gateway),
        amount: Set(order.total_price),
        currency: Set(currency.to_string()),
        gateway_order_id: Set(gateway_order_id),
        gateway_payment_id: Set(None),
        gateway_signature: Set(None),
        transaction_id: Set(None),
        status: Set(PaymentRecordStatus::Pending),
        failure_reason: Set(None),
        paid_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Pending, OrderStatus::PaymentFailed, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Processing, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Processing, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[case(OrderStatus::PaymentFailed, OrderStatus::Pending, true)]
    #[case(OrderStatus::Pending, OrderStatus::Delivered, false)]
    #[case(OrderStatus::Shipped, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Confirmed, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Pending, false)]
    fn status_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] ok: bool) {
        assert_eq!(is_valid_transition(from, to), ok);
    }

    #[rstest]
    #[case(OrderStatus::Pending, true)]
    #[case(OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Processing, false)]
    #[case(OrderStatus::Shipped, false)]
    #[case(OrderStatus::Delivered, false)]
    #[case(OrderStatus::Cancelled, false)]
    #[case(OrderStatus::PaymentFailed, false)]
    fn cancellable_statuses(#[case] status: OrderStatus, #[case] ok: bool) {
        assert_eq!(is_cancellable(status), ok);
    }

    #[test]
    fn order_number_has_date_and_suffix() {
        let now = DateTime::parse_from_rfc3339("2026-03-09T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_order_number(now);
        let pattern = Regex::new(r"^ORD-20260309-[A-Z0-9]{6}$").unwrap();
        assert!(pattern.is_match(&number), "{}", number);
    }
}
