use crate::{
    entities::{
        product::{self, Entity as ProductEntity, ProductImages},
        wishlist_item::{self, Entity as WishlistEntity},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistInput {
    pub product_id: Option<Uuid>,
}

impl WishlistInput {
    pub fn require_product(&self) -> Result<Uuid, ServiceError> {
        self.product_id
            .ok_or_else(|| ServiceError::BadRequest("Product ID is required".into()))
    }
}

/// Flattened product as shown on the wishlist page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistEntry {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub price: Decimal,
    pub final_price: Decimal,
    pub images: ProductImages,
    pub stock: i32,
    pub is_active: bool,
    pub average_rating: Decimal,
    pub num_reviews: i32,
    pub added_at: DateTime<Utc>,
}

impl WishlistEntry {
    fn new(item: &wishlist_item::Model, product: &product::Model) -> Self {
        Self {
            id: product.id,
            slug: product.slug.clone(),
            name: product.name.clone(),
            price: product.price,
            final_price: product.selling_price(),
            images: product.images.clone(),
            stock: product.stock,
            is_active: product.is_active,
            average_rating: product.average_rating,
            num_reviews: product.num_reviews,
            added_at: item.added_at,
        }
    }
}

#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
}

impl WishlistService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Saved products, newest first. Entries whose product was deleted or
    /// deactivated are pruned.
    pub async fn get(&self, user_id: Uuid) -> Result<Vec<WishlistEntry>, ServiceError> {
        let rows = WishlistEntity::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .find_also_related(ProductEntity)
            .order_by_desc(wishlist_item::Column::AddedAt)
            .all(&*self.db)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut stale = Vec::new();
        for (item, product) in rows {
            match product.filter(|p| p.is_active) {
                Some(product) => entries.push(WishlistEntry::new(&item, &product)),
                None => stale.push(item.id),
            }
        }

        if !stale.is_empty() {
            debug!(%user_id, pruned = stale.len(), "pruning stale wishlist entries");
            WishlistEntity::delete_many()
                .filter(wishlist_item::Column::Id.is_in(stale))
                .exec(&*self.db)
                .await?;
        }
        Ok(entries)
    }

    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<WishlistEntry>, ServiceError> {
        let product = self.product(product_id).await?;
        if !product.is_active {
            return Err(ServiceError::BadRequest("Product is not available".into()));
        }
        if self.contains(user_id, product_id).await? {
            return Err(ServiceError::BadRequest("Product already in wishlist".into()));
        }
        self.insert(user_id, product_id).await?;
        self.get(user_id).await
    }

    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<WishlistEntry>, ServiceError> {
        WishlistEntity::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        self.get(user_id).await
    }

    /// Adds when absent, removes when present. Returns whether the product
    /// is now saved.
    #[instrument(skip(self))]
    pub async fn toggle(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<(bool, Vec<WishlistEntry>), ServiceError> {
        self.product(product_id).await?;

        let added = if self.contains(user_id, product_id).await? {
            WishlistEntity::delete_many()
                .filter(wishlist_item::Column::UserId.eq(user_id))
                .filter(wishlist_item::Column::ProductId.eq(product_id))
                .exec(&*self.db)
                .await?;
            false
        } else {
            self.insert(user_id, product_id).await?;
            true
        };
        Ok((added, self.get(user_id).await?))
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        WishlistEntity::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn contains(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, ServiceError> {
        let n = WishlistEntity::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .count(&*self.db)
            .await?;
        Ok(n > 0)
    }

    async fn product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))
    }

    async fn insert(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        wishlist_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            added_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_product_id_is_rejected() {
        let err = WishlistInput::default().require_product().unwrap_err();
        assert_eq!(err.to_string(), "Product ID is required");
    }
}
