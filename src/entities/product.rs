use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product owned by a seller.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(nullable)]
    pub short_description: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))", nullable)]
    pub discount_price: Option<Decimal>,
    pub category_id: Uuid,
    #[sea_orm(nullable)]
    pub brand: Option<String>,
    pub stock: i32,
    #[sea_orm(nullable)]
    pub sku: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub images: ProductImages,
    pub seller_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((3, 1)))")]
    pub average_rating: Decimal,
    pub num_reviews: i32,
    #[sea_orm(column_type = "Json")]
    pub rating_distribution: RatingDistribution,
    #[sea_orm(column_type = "Json")]
    pub tags: Tags,
    pub is_featured: bool,
    pub is_active: bool,
    pub sold_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Unit price the buyer pays: the discount price when one is set.
    pub fn selling_price(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price)
    }

    pub fn primary_image(&self) -> Option<String> {
        self.images.0.first().map(|img| img.url.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ProductImages(pub Vec<ProductImage>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Tags(pub Vec<String>);

/// Count of reviews per star rating.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct RatingDistribution {
    #[serde(rename = "1")]
    pub one: i32,
    #[serde(rename = "2")]
    pub two: i32,
    #[serde(rename = "3")]
    pub three: i32,
    #[serde(rename = "4")]
    pub four: i32,
    #[serde(rename = "5")]
    pub five: i32,
}

impl RatingDistribution {
    pub fn record(&mut self, rating: i32) {
        match rating {
            1 => self.one += 1,
            2 => self.two += 1,
            3 => self.three += 1,
            4 => self.four += 1,
            5 => self.five += 1,
            _ => {}
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::category::Entity",
        from = "Column::CategoryId",
        to = "super::category::Column::Id"
    )]
    Category,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::SellerId",
        to = "super::user::Column::Id"
    )]
    Seller,
    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
