//! Order pricing: coupon discount, tax, shipping and total.
//!
//! Every component is rounded to two decimals on its own and the total is
//! the sum of the rounded components.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::PricingConfig;
use crate::entities::coupon::{self, DiscountType};

/// Rounds half away from zero to two decimals.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub items_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct PricingRules {
    tax_rate: Decimal,
    free_shipping_threshold: Decimal,
    flat_shipping_fee: Decimal,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self::from(&PricingConfig::default())
    }
}

impl From<&PricingConfig> for PricingRules {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate(),
            free_shipping_threshold: cfg.free_shipping_threshold(),
            flat_shipping_fee: cfg.flat_shipping_fee(),
        }
    }
}

impl PricingRules {
    /// Free when the items total is strictly above the threshold.
    pub fn shipping_for(&self, items_price: Decimal) -> Decimal {
        if items_price > self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.flat_shipping_fee
        }
    }

    /// Prices an order. `discount` is clamped to the items total.
    pub fn price(&self, items_price: Decimal, discount: Decimal) -> PriceBreakdown {
        let items_price = round2(items_price);
        let discount_amount = round2(discount.max(Decimal::ZERO).min(items_price));
        let tax_price = round2((items_price - discount_amount) * self.tax_rate);
        let shipping_price = round2(self.shipping_for(items_price));
        let total_price = round2(items_price - discount_amount + tax_price + shipping_price);

        PriceBreakdown {
            items_price,
            discount_amount,
            tax_price,
            shipping_price,
            total_price,
        }
    }
}

/// Active and not yet expired. Usage limits and minimum purchase are
/// checked separately.
pub fn coupon_is_live(coupon: &coupon::Model, now: DateTime<Utc>) -> bool {
    coupon.is_active && coupon.valid_until >= now
}

/// False once `used_count` has reached a set usage limit.
pub fn coupon_has_uses_left(coupon: &coupon::Model) -> bool {
    match coupon.usage_limit {
        Some(limit) if limit > 0 => coupon.used_count < limit,
        _ => true,
    }
}

/// Discount a coupon gives on `items_price`, or zero below its minimum.
pub fn coupon_discount(coupon: &coupon::Model, items_price: Decimal) -> Decimal {
    if items_price < coupon.min_purchase_amount {
        return Decimal::ZERO;
    }

    match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = items_price * coupon.discount_value / Decimal::ONE_HUNDRED;
            match coupon.max_discount_amount {
                Some(cap) if cap > Decimal::ZERO => raw.min(cap),
                _ => raw,
            }
        }
        DiscountType::Fixed => coupon.discount_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn coupon(kind: DiscountType, value: Decimal, min: Decimal, cap: Option<Decimal>) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            description: None,
            discount_type: kind,
            discount_value: value,
            max_discount_amount: cap,
            min_purchase_amount: min,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            usage_limit: None,
            used_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn single_item_without_coupon() {
        let p = PricingRules::default().price(dec!(600), Decimal::ZERO);
        assert_eq!(p.items_price, dec!(600));
        assert_eq!(p.shipping_price, dec!(0));
        assert_eq!(p.tax_price, dec!(108));
        assert_eq!(p.total_price, dec!(708));
    }

    #[test]
    fn ten_percent_coupon_over_minimum() {
        let c = coupon(DiscountType::Percentage, dec!(10), dec!(500), None);
        let discount = coupon_discount(&c, dec!(600));
        let p = PricingRules::default().price(dec!(600), discount);
        assert_eq!(p.discount_amount, dec!(60));
        assert_eq!(p.tax_price, dec!(97.2));
        assert_eq!(p.shipping_price, dec!(0));
        assert_eq!(p.total_price, dec!(637.2));
    }

    #[test]
    fn shipping_applies_at_and_below_threshold() {
        let rules = PricingRules::default();
        assert_eq!(rules.shipping_for(dec!(500)), dec!(40));
        assert_eq!(rules.shipping_for(dec!(500.01)), dec!(0));

        let p = rules.price(dec!(100), Decimal::ZERO);
        assert_eq!(p.tax_price, dec!(18));
        assert_eq!(p.total_price, dec!(158));
    }

    #[test]
    fn percentage_coupon_is_capped() {
        let c = coupon(DiscountType::Percentage, dec!(50), dec!(0), Some(dec!(100)));
        assert_eq!(coupon_discount(&c, dec!(1000)), dec!(100));
    }

    #[test]
    fn fixed_coupon_below_minimum_gives_nothing() {
        let c = coupon(DiscountType::Fixed, dec!(75), dec!(1000), None);
        assert_eq!(coupon_discount(&c, dec!(999.99)), Decimal::ZERO);
        assert_eq!(coupon_discount(&c, dec!(1000)), dec!(75));
    }

    #[test]
    fn expired_or_inactive_coupon_is_not_live() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, dec!(10), dec!(0), None);
        assert!(coupon_is_live(&c, now));

        c.valid_until = now - Duration::seconds(1);
        assert!(!coupon_is_live(&c, now));

        c.valid_until = now + Duration::days(1);
        c.is_active = false;
        assert!(!coupon_is_live(&c, now));
    }

    #[test]
    fn usage_limit_is_exhausted_at_limit() {
        let mut c = coupon(DiscountType::Fixed, dec!(10), dec!(0), None);
        assert!(coupon_has_uses_left(&c));

        c.usage_limit = Some(2);
        c.used_count = 1;
        assert!(coupon_has_uses_left(&c));
        c.used_count = 2;
        assert!(!coupon_has_uses_left(&c));
    }

    proptest! {
        #[test]
        fn total_is_sum_of_rounded_terms(
            cents in 1i64..10_000_000,
            percent in 0u32..=100,
        ) {
            let items = Decimal::new(cents, 2);
            let discount = items * Decimal::from(percent) / Decimal::ONE_HUNDRED;
            let p = PricingRules::default().price(items, discount);

            prop_assert_eq!(
                p.total_price,
                p.items_price - p.discount_amount + p.tax_price + p.shipping_price
            );
            prop_assert!(p.discount_amount <= p.items_price);
            prop_assert!(p.tax_price >= Decimal::ZERO);
            prop_assert!(p.total_price.scale() <= 2);
        }
    }
}
