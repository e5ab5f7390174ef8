use crate::{
    entities::coupon::{self, DiscountType, Entity as CouponEntity},
    errors::ServiceError,
    services::pricing::{coupon_discount, coupon_has_uses_left, coupon_is_live},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("negative");
        err.message = Some("Amounts cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 30, message = "Coupon code must be 3-30 characters"))]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(custom = "validate_non_negative")]
    pub discount_value: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub min_purchase_amount: Decimal,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: DateTime<Utc>,
    #[validate(range(min = 1, message = "Usage limit must be at least 1"))]
    pub usage_limit: Option<i32>,
}

/// Active coupon by code, case-insensitively. Expiry is not checked here.
pub async fn find_active_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<coupon::Model>, ServiceError> {
    Ok(CouponEntity::find()
        .filter(coupon::Column::Code.eq(code.trim().to_uppercase()))
        .filter(coupon::Column::IsActive.eq(true))
        .one(conn)
        .await?)
}

/// The coupon and its discount when `code` applies to `items_price` right
/// now; `None` for unknown, expired, exhausted or below-minimum coupons.
pub async fn applicable_coupon<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    items_price: Decimal,
) -> Result<Option<(coupon::Model, Decimal)>, ServiceError> {
    let coupon = match find_active_by_code(conn, code).await? {
        Some(coupon) => coupon,
        None => return Ok(None),
    };
    if !coupon_is_live(&coupon, Utc::now())
        || !coupon_has_uses_left(&coupon)
        || items_price < coupon.min_purchase_amount
    {
        return Ok(None);
    }
    let discount = coupon_discount(&coupon, items_price);
    Ok(Some((coupon, discount)))
}

/// Admin coupon management.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        if input.discount_type == DiscountType::Percentage
            && input.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "Percentage discount cannot exceed 100".into(),
            ));
        }

        let now = Utc::now();
        let valid_from = input.valid_from.unwrap_or(now);
        if input.valid_until <= valid_from {
            return Err(ServiceError::ValidationError(
                "Coupon must end after it starts".into(),
            ));
        }

        let code = input.code.trim().to_uppercase();
        let taken = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .count(&*self.db)
            .await?;
        if taken > 0 {
            return Err(ServiceError::BadRequest(
                "Coupon with this code already exists".into(),
            ));
        }

        let coupon = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            max_discount_amount: Set(input.max_discount_amount),
            min_purchase_amount: Set(input.min_purchase_amount),
            valid_from: Set(valid_from),
            valid_until: Set(input.valid_until),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(coupon_id = %coupon.id, code = %coupon.code, "coupon created");
        Ok(coupon)
    }

    pub async fn list(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(CouponEntity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
