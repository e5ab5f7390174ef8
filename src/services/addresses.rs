use crate::{
    entities::address::{self, AddressType, Entity as AddressEntity},
    errors::ServiceError,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{10}$").expect("valid phone regex"));
static PINCODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{6}$").expect("valid pincode regex"));

const DEFAULT_COUNTRY: &str = "India";

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if PHONE_RE.is_match(phone) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("Please enter valid 10-digit phone number".into());
        Err(err)
    }
}

fn validate_pincode(pincode: &str) -> Result<(), ValidationError> {
    if PINCODE_RE.is_match(pincode) {
        Ok(())
    } else {
        let mut err = ValidationError::new("pincode");
        err.message = Some("Please enter valid 6-digit pincode".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub full_name: Option<String>,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
    #[validate(custom = "validate_pincode")]
    pub pincode: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub landmark: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub is_default: Option<bool>,
    pub address_type: Option<AddressType>,
}

impl AddressInput {
    fn has_required_fields(&self) -> bool {
        [
            &self.full_name,
            &self.phone,
            &self.pincode,
            &self.address_line1,
            &self.city,
            &self.state,
        ]
        .iter()
        .all(|f| f.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false))
    }
}

/// Buyer address book.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Default address first, then newest.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<address::Model>, ServiceError> {
        Ok(AddressEntity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<address::Model, ServiceError> {
        find_owned(&*self.db, user_id, id).await
    }

    #[instrument(skip(self, input))]
    pub async fn create(
        &self,
        user_id: Uuid,
        input: AddressInput,
    ) -> Result<address::Model, ServiceError> {
        if !input.has_required_fields() {
            return Err(ServiceError::BadRequest(
                "Please provide all required fields".into(),
            ));
        }
        input.validate()?;

        let is_default = input.is_default.unwrap_or(false);
        let txn = self.db.begin().await?;
        if is_default {
            clear_defaults(&txn, user_id, None).await?;
        }

        let now = Utc::now();
        let address = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            full_name: Set(trimmed(input.full_name)),
            phone: Set(trimmed(input.phone)),
            address_line1: Set(trimmed(input.address_line1)),
            address_line2: Set(input.address_line2.filter(|s| !s.trim().is_empty())),
            landmark: Set(input.landmark.filter(|s| !s.trim().is_empty())),
            city: Set(trimmed(input.city)),
            state: Set(trimmed(input.state)),
            pincode: Set(trimmed(input.pincode)),
            country: Set(input
                .country
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_COUNTRY.to_string())),
            address_type: Set(input.address_type.unwrap_or_default()),
            is_default: Set(is_default),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(address_id = %address.id, %user_id, "address added");
        Ok(address)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        input: AddressInput,
    ) -> Result<address::Model, ServiceError> {
        let existing = find_owned(&*self.db, user_id, id).await?;
        input.validate()?;

        let txn = self.db.begin().await?;
        if input.is_default == Some(true) {
            clear_defaults(&txn, user_id, Some(id)).await?;
        }

        let mut active: address::ActiveModel = existing.into();
        if let Some(v) = non_blank(input.full_name) {
            active.full_name = Set(v);
        }
        if let Some(v) = non_blank(input.phone) {
            active.phone = Set(v);
        }
        if let Some(v) = non_blank(input.pincode) {
            active.pincode = Set(v);
        }
        if let Some(v) = non_blank(input.address_line1) {
            active.address_line1 = Set(v);
        }
        if let Some(v) = input.address_line2 {
            active.address_line2 = Set(Some(v).filter(|s| !s.trim().is_empty()));
        }
        if let Some(v) = input.landmark {
            active.landmark = Set(Some(v).filter(|s| !s.trim().is_empty()));
        }
        if let Some(v) = non_blank(input.city) {
            active.city = Set(v);
        }
        if let Some(v) = non_blank(input.state) {
            active.state = Set(v);
        }
        if let Some(v) = non_blank(input.country) {
            active.country = Set(v);
        }
        if let Some(v) = input.address_type {
            active.address_type = Set(v);
        }
        if let Some(v) = input.is_default {
            active.is_default = Set(v);
        }
        active.updated_at = Set(Utc::now());

        let address = active.update(&txn).await?;
        txn.commit().await?;
        Ok(address)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let address = find_owned(&*self.db, user_id, id).await?;
        address.delete(&*self.db).await?;
        info!(address_id = %id, "address deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_default(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let address = find_owned(&txn, user_id, id).await?;
        clear_defaults(&txn, user_id, None).await?;

        let mut active: address::ActiveModel = address.into();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now());
        let address = active.update(&txn).await?;
        txn.commit().await?;
        Ok(address)
    }
}

/// An address owned by `user_id`; someone else's address reads as missing.
pub async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    id: Uuid,
) -> Result<address::Model, ServiceError> {
    AddressEntity::find_by_id(id)
        .filter(address::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Address not found".into()))
}

async fn clear_defaults<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    except: Option<Uuid>,
) -> Result<(), ServiceError> {
    let mut update = AddressEntity::update_many()
        .col_expr(address::Column::IsDefault, Expr::value(false))
        .filter(address::Column::UserId.eq(user_id));
    if let Some(id) = except {
        update = update.filter(address::Column::Id.ne(id));
    }
    update.exec(conn).await?;
    Ok(())
}

fn trimmed(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn input() -> AddressInput {
        AddressInput {
            full_name: Some("Asha Rao".into()),
            phone: Some("9876543210".into()),
            pincode: Some("560001".into()),
            address_line1: Some("12 MG Road".into()),
            city: Some("Bengaluru".into()),
            state: Some("Karnataka".into()),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("9876543210", true)]
    #[case("987654321", false)]
    #[case("98765432100", false)]
    #[case("98765-43210", false)]
    fn phone_must_be_ten_digits(#[case] phone: &str, #[case] ok: bool) {
        assert_eq!(validate_phone(phone).is_ok(), ok);
    }

    #[rstest]
    #[case("560001", true)]
    #[case("56001", false)]
    #[case("5600012", false)]
    #[case("ABCDEF", false)]
    fn pincode_must_be_six_digits(#[case] pincode: &str, #[case] ok: bool) {
        assert_eq!(validate_pincode(pincode).is_ok(), ok);
    }

    #[test]
    fn complete_input_passes() {
        let input = input();
        assert!(input.has_required_fields());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn blank_required_field_is_reported() {
        let mut input = input();
        input.city = Some("  ".into());
        assert!(!input.has_required_fields());
    }

    #[test]
    fn bad_pincode_reports_its_message() {
        let mut input = input();
        input.pincode = Some("12".into());
        let err = ServiceError::from(input.validate().unwrap_err());
        assert_eq!(err.to_string(), "Please enter valid 6-digit pincode");
    }
}
