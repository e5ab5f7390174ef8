use crate::{
    entities::{
        cart::{self, Entity as CartEntity},
        cart_item::{self, Entity as CartItemEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[serde(default = "one")]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityInput {
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i32,
}

/// Product fields shown next to a cart line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartProduct {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub image: Option<String>,
    pub stock: i32,
    pub is_active: bool,
}

impl From<&product::Model> for CartProduct {
    fn from(p: &product::Model) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            slug: p.slug.clone(),
            price: p.price,
            discount_price: p.discount_price,
            image: p.primary_image(),
            stock: p.stock,
            is_active: p.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    /// `None` when the product has since been removed from the catalog
    pub product: Option<CartProduct>,
    pub quantity: i32,
    pub price: Decimal,
    pub final_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Option<Uuid>,
    pub items: Vec<CartLine>,
    pub total_items: i32,
    pub total_price: Decimal,
    pub total_discount: Decimal,
    pub final_price: Decimal,
}

impl CartView {
    fn empty() -> Self {
        Self {
            id: None,
            items: Vec::new(),
            total_items: 0,
            total_price: Decimal::ZERO,
            total_discount: Decimal::ZERO,
            final_price: Decimal::ZERO,
        }
    }
}

/// A cart with its lines, each paired with the live product if it still exists.
#[derive(Debug, Clone)]
pub struct LoadedCart {
    pub cart: cart::Model,
    pub lines: Vec<(cart_item::Model, Option<product::Model>)>,
}

impl LoadedCart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Loads the user's cart on any connection, including an open transaction.
pub async fn load_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<LoadedCart>, ServiceError> {
    let cart = match CartEntity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        Some(cart) => cart,
        None => return Ok(None),
    };

    let lines = CartItemEntity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(ProductEntity)
        .all(conn)
        .await?;

    Ok(Some(LoadedCart { cart, lines }))
}

/// Deletes the cart; its lines go with it.
pub async fn delete_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), ServiceError> {
    CartItemEntity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    CartEntity::delete_by_id(cart_id).exec(conn).await?;
    Ok(())
}

/// Recomputes the derived totals from the current lines.
async fn recompute_totals<C: ConnectionTrait>(
    conn: &C,
    cart: cart::Model,
) -> Result<cart::Model, ServiceError> {
    let items = CartItemEntity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .all(conn)
        .await?;

    let total_items: i32 = items.iter().map(|i| i.quantity).sum();
    let total_price: Decimal = items
        .iter()
        .map(|i| i.price * Decimal::from(i.quantity))
        .sum();
    let final_price: Decimal = items
        .iter()
        .map(|i| i.final_price * Decimal::from(i.quantity))
        .sum();

    let mut active: cart::ActiveModel = cart.into();
    active.total_items = Set(total_items);
    active.total_price = Set(total_price);
    active.final_price = Set(final_price);
    active.total_discount = Set(total_price - final_price);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// The caller's cart, or an empty one.
    pub async fn get(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        Ok(load_cart(&*self.db, user_id)
            .await?
            .map(to_view)
            .unwrap_or_else(CartView::empty))
    }

    /// Adds a product or increases its quantity.
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add(&self, user_id: Uuid, input: AddToCartInput) -> Result<CartView, ServiceError> {
        input.validate()?;

        let product = ProductEntity::find_by_id(input.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))?;
        if !product.is_active {
            return Err(ServiceError::BadRequest("Product is not available".into()));
        }

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let cart = match CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
        {
            Some(cart) => cart,
            None => {
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    total_items: Set(0),
                    total_price: Set(Decimal::ZERO),
                    total_discount: Set(Decimal::ZERO),
                    final_price: Set(Decimal::ZERO),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&txn)
            .await?;

        let wanted = existing.as_ref().map(|i| i.quantity).unwrap_or(0) + input.quantity;
        ensure_stock(&product, wanted)?;

        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(wanted);
                active.price = Set(product.price);
                active.final_price = Set(product.selling_price());
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(wanted),
                    price: Set(product.price),
                    final_price: Set(product.selling_price()),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let cart = recompute_totals(&txn, cart).await?;
        txn.commit().await?;

        info!(%user_id, quantity = wanted, "cart line added");
        self.event_sender
            .send_or_log(Event::CartUpdated {
                user_id,
                total_items: cart.total_items,
            })
            .await;
        self.get(user_id).await
    }

    /// Sets a line's quantity; zero removes it.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".into(),
            ));
        }
        if quantity == 0 {
            return self.remove(user_id, product_id).await;
        }

        let txn = self.db.begin().await?;
        let cart = find_cart(&txn, user_id).await?;
        let item = find_line(&txn, cart.id, product_id).await?;

        let product = ProductEntity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))?;
        ensure_stock(&product, quantity)?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.price = Set(product.price);
        active.final_price = Set(product.selling_price());
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let cart = recompute_totals(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                user_id,
                total_items: cart.total_items,
            })
            .await;
        self.get(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = find_cart(&txn, user_id).await?;
        let item = find_line(&txn, cart.id, product_id).await?;
        item.delete(&txn).await?;
        let cart = recompute_totals(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                user_id,
                total_items: cart.total_items,
            })
            .await;
        self.get(user_id).await
    }

    /// Empties the cart but keeps the cart row.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = find_cart(&txn, user_id).await?;
        CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        recompute_totals(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(user_id)).await;
        self.get(user_id).await
    }
}

async fn find_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<cart::Model, ServiceError> {
    CartEntity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Cart not found".into()))
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> Result<cart_item::Model, ServiceError> {
    CartItemEntity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::ProductId.eq(product_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Item not found in cart".into()))
}

fn ensure_stock(product: &product::Model, wanted: i32) -> Result<(), ServiceError> {
    if wanted > product.stock {
        return Err(ServiceError::InsufficientStock(format!(
            "Only {} items available in stock",
            product.stock
        )));
    }
    Ok(())
}

fn to_view(loaded: LoadedCart) -> CartView {
    let LoadedCart { cart, lines } = loaded;
    CartView {
        id: Some(cart.id),
        items: lines
            .into_iter()
            .map(|(item, product)| CartLine {
                product_id: item.product_id,
                product: product.as_ref().map(CartProduct::from),
                quantity: item.quantity,
                price: item.price,
                final_price: item.final_price,
            })
            .collect(),
        total_items: cart.total_items,
        total_price: cart.total_price,
        total_discount: cart.total_discount,
        final_price: cart.final_price,
    }
}
