use crate::{
    entities::{address, cart_item, order::OrderItem, product},
    errors::ServiceError,
    services::{
        addresses::AddressService,
        cart::load_cart,
        coupons::{applicable_coupon, find_active_by_code},
        pricing::{
            coupon_discount, coupon_has_uses_left, coupon_is_live, round2, PriceBreakdown,
            PricingRules,
        },
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Snapshots the live lines of a cart. Lines whose product has been
/// deleted are skipped. Returns the snapshot and `Σ price × quantity`.
pub fn snapshot_lines(
    lines: &[(cart_item::Model, Option<product::Model>)],
) -> (Vec<OrderItem>, Decimal) {
    let mut items_price = Decimal::ZERO;
    let items = lines
        .iter()
        .filter_map(|(line, product)| {
            let product = product.as_ref()?;
            items_price += product.price * Decimal::from(line.quantity);
            Some(OrderItem {
                product: product.id,
                name: product.name.clone(),
                quantity: line.quantity,
                price: product.price,
                image: product.primary_image(),
            })
        })
        .collect();
    (items, items_price)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutDetails {
    pub items: Vec<OrderItem>,
    pub addresses: Vec<address::Model>,
    pub pricing: PriceBreakdown,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponCheckInput {
    pub code: Option<String>,
    #[serde(default)]
    pub items_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponQuote {
    pub code: String,
    pub discount_amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryInput {
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    #[serde(flatten)]
    pub pricing: PriceBreakdown,
    pub applied_coupon: Option<String>,
}

/// Read-only checkout previews. Nothing here writes.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    addresses: AddressService,
    rules: PricingRules,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, rules: PricingRules) -> Self {
        Self {
            addresses: AddressService::new(db.clone()),
            db,
            rules,
        }
    }

    pub async fn details(&self, user_id: Uuid) -> Result<CheckoutDetails, ServiceError> {
        let cart = load_cart(&*self.db, user_id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Cart is empty".into()))?;

        let (items, items_price) = snapshot_lines(&cart.lines);
        Ok(CheckoutDetails {
            items,
            addresses: self.addresses.list(user_id).await?,
            pricing: self.rules.price(items_price, Decimal::ZERO),
        })
    }

    /// Checks a coupon against an items total supplied by the client.
    pub async fn validate_coupon(&self, input: CouponCheckInput) -> Result<CouponQuote, ServiceError> {
        let code = input
            .code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Please provide coupon code".into()))?;

        let coupon = find_active_by_code(&*self.db, &code)
            .await?
            .filter(|c| coupon_is_live(c, Utc::now()))
            .ok_or_else(|| ServiceError::NotFound("Invalid or expired coupon code".into()))?;

        if input.items_price < coupon.min_purchase_amount {
            return Err(ServiceError::BadRequest(format!(
                "Minimum purchase amount of ₹{} required",
                coupon.min_purchase_amount.normalize()
            )));
        }
        if !coupon_has_uses_left(&coupon) {
            return Err(ServiceError::BadRequest("Coupon usage limit reached".into()));
        }

        Ok(CouponQuote {
            discount_amount: round2(coupon_discount(&coupon, input.items_price)),
            code: coupon.code,
            description: coupon.description,
        })
    }

    /// Prices the caller's cart with an optional coupon. Usage is not
    /// recorded; an inapplicable coupon is ignored.
    pub async fn calculate(&self, user_id: Uuid, input: SummaryInput) -> Result<OrderSummary, ServiceError> {
        let cart = load_cart(&*self.db, user_id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Cart is empty".into()))?;
        let (_, items_price) = snapshot_lines(&cart.lines);

        let applied = match input.coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(code) => applicable_coupon(&*self.db, code, items_price).await?,
            None => None,
        };
        let discount = applied.as_ref().map(|(_, d)| *d).unwrap_or_default();

        Ok(OrderSummary {
            pricing: self.rules.price(items_price, discount),
            applied_coupon: applied.map(|(c, _)| c.code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product::{ProductImage, ProductImages, RatingDistribution, Tags};
    use rust_decimal_macros::dec;

    fn product(name: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: name.to_lowercase(),
            description: "desc".into(),
            short_description: None,
            price,
            discount_price: Some(price - dec!(1)),
            category_id: Uuid::new_v4(),
            brand: None,
            stock: 10,
            sku: None,
            images: ProductImages(vec![ProductImage {
                url: format!("https://img.test/{}.jpg", name),
                public_id: None,
                alt: None,
            }]),
            seller_id: Uuid::new_v4(),
            average_rating: Decimal::ZERO,
            num_reviews: 0,
            rating_distribution: RatingDistribution::default(),
            tags: Tags::default(),
            is_featured: false,
            is_active: true,
            sold_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn line(product_id: Uuid, quantity: i32) -> cart_item::Model {
        let now = Utc::now();
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id,
            quantity,
            price: Decimal::ZERO,
            final_price: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn snapshot_uses_list_price_and_skips_deleted_products() {
        let lamp = product("Lamp", dec!(250));
        let mug = product("Mug", dec!(99.5));
        let lines = vec![
            (line(lamp.id, 2), Some(lamp.clone())),
            (line(Uuid::new_v4(), 5), None),
            (line(mug.id, 1), Some(mug.clone())),
        ];

        let (items, items_price) = snapshot_lines(&lines);

        assert_eq!(items.len(), 2);
        assert_eq!(items_price, dec!(599.5));
        assert_eq!(items[0].name, "Lamp");
        assert_eq!(items[0].price, dec!(250));
        assert_eq!(items[0].image.as_deref(), Some("https://img.test/Lamp.jpg"));
    }
}
