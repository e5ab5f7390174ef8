use crate::{
    auth::AuthUser,
    entities::{
        category::{self, Entity as CategoryEntity},
        product::{self, Entity as ProductEntity, ProductImage, ProductImages, RatingDistribution, Tags},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Select, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: u64 = 12;
const MAX_PAGE_SIZE: u64 = 100;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Lowercase, hyphen-separated form of a name.
pub fn slugify(name: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Listing filters. Field names follow the query string.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub search: Option<String>,
    /// Category id or slug
    pub category: Option<String>,
    pub brand: Option<String>,
    pub seller: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_rating: Option<Decimal>,
    pub in_stock: Option<bool>,
    pub is_featured: Option<bool>,
    pub sort: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub count: usize,
    pub total: u64,
    pub page: u64,
    pub total_pages: u64,
    pub products: Vec<product::Model>,
}

impl ProductPage {
    fn empty(page: u64) -> Self {
        Self {
            count: 0,
            total: 0,
            page,
            total_pages: 0,
            products: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200, message = "Please provide product name"))]
    pub name: String,
    pub slug: Option<String>,
    #[validate(length(min = 1, message = "Please provide product description"))]
    pub description: String,
    #[validate(length(max = 500, message = "Short description cannot exceed 500 characters"))]
    pub short_description: Option<String>,
    #[validate(custom = "validate_money")]
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub category_id: Uuid,
    pub brand: Option<String>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    pub sku: Option<String>,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200, message = "Please provide product name"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    #[validate(custom = "validate_money")]
    pub price: Option<Decimal>,
    /// `Some(None)` is not distinguishable from absent in JSON; send
    /// `removeDiscount` to clear.
    pub discount_price: Option<Decimal>,
    #[serde(default)]
    pub remove_discount: bool,
    pub category_id: Option<Uuid>,
    pub brand: Option<String>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: Option<i32>,
    pub sku: Option<String>,
    pub images: Option<Vec<ProductImage>>,
    pub tags: Option<Vec<String>>,
    pub is_featured: Option<bool>,
    pub is_active: Option<bool>,
}

fn validate_money(value: &Decimal) -> Result<(), validator::ValidationError> {
    if value.is_sign_negative() {
        let mut err = validator::ValidationError::new("price");
        err.message = Some("Price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

fn check_discount(price: Decimal, discount: Option<Decimal>) -> Result<(), ServiceError> {
    match discount {
        Some(d) if d.is_sign_negative() || d >= price => Err(ServiceError::ValidationError(
            "Discount price must be less than regular price".into(),
        )),
        _ => Ok(()),
    }
}

/// Catalog reads and seller-side product management.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Active products matching the filters.
    #[instrument(skip(self))]
    pub async fn list(&self, query: ProductQuery) -> Result<ProductPage, ServiceError> {
        let (page, limit) = page_params(query.page, query.limit);
        let mut select = ProductEntity::find().filter(product::Column::IsActive.eq(true));

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            select = select.filter(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Name))).like(pattern.clone()))
                    .add(
                        Expr::expr(Func::lower(Expr::col(product::Column::Description)))
                            .like(pattern.clone()),
                    )
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Brand))).like(pattern)),
            );
        }

        if let Some(identifier) = query.category.as_deref().filter(|c| !c.is_empty()) {
            match self.resolve_category(identifier).await? {
                Some(category) => {
                    select = select.filter(product::Column::CategoryId.eq(category.id));
                }
                None => return Ok(ProductPage::empty(page)),
            }
        }

        if let Some(brand) = query.brand.filter(|b| !b.is_empty()) {
            select = select.filter(product::Column::Brand.eq(brand));
        }
        if let Some(seller) = query.seller {
            select = select.filter(product::Column::SellerId.eq(seller));
        }
        if let Some(min) = query.min_price {
            select = select.filter(product::Column::Price.gte(min));
        }
        if let Some(max) = query.max_price {
            select = select.filter(product::Column::Price.lte(max));
        }
        if let Some(rating) = query.min_rating {
            select = select.filter(product::Column::AverageRating.gte(rating));
        }
        if query.in_stock == Some(true) {
            select = select.filter(product::Column::Stock.gt(0));
        }
        if query.is_featured == Some(true) {
            select = select.filter(product::Column::IsFeatured.eq(true));
        }

        let select = apply_sort(select, query.sort.as_deref());
        self.paginate(select, page, limit).await
    }

    /// Looks a product up by id, falling back to slug.
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<product::Model, ServiceError> {
        let found = match Uuid::parse_str(identifier) {
            Ok(id) => ProductEntity::find_by_id(id).one(&*self.db).await?,
            Err(_) => {
                ProductEntity::find()
                    .filter(product::Column::Slug.eq(identifier))
                    .one(&*self.db)
                    .await?
            }
        };
        found.ok_or_else(|| ServiceError::NotFound("Product not found".into()))
    }

    pub async fn get(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))
    }

    /// Public storefront of a seller.
    pub async fn list_by_seller(
        &self,
        seller_id: Uuid,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<ProductPage, ServiceError> {
        let (page, limit) = page_params(page, limit);
        let select = ProductEntity::find()
            .filter(product::Column::SellerId.eq(seller_id))
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt);
        self.paginate(select, page, limit).await
    }

    /// Everything the seller owns, inactive products included.
    pub async fn list_own(
        &self,
        seller_id: Uuid,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<ProductPage, ServiceError> {
        let (page, limit) = page_params(page, limit);
        let select = ProductEntity::find()
            .filter(product::Column::SellerId.eq(seller_id))
            .order_by_desc(product::Column::CreatedAt);
        self.paginate(select, page, limit).await
    }

    #[instrument(skip(self, input), fields(seller_id = %seller.user_id))]
    pub async fn create(
        &self,
        seller: &AuthUser,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        check_discount(input.price, input.discount_price)?;

        CategoryEntity::find_by_id(input.category_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Category not found".into()))?;

        let base = input
            .slug
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&input.name));
        let slug = self.unique_slug(&base).await?;

        let now = Utc::now();
        let images = input
            .images
            .into_iter()
            .map(|img| ProductImage {
                alt: img.alt.or_else(|| Some(input.name.clone())),
                ..img
            })
            .collect();

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            slug: Set(slug),
            description: Set(input.description),
            short_description: Set(input.short_description),
            price: Set(input.price),
            discount_price: Set(input.discount_price),
            category_id: Set(input.category_id),
            brand: Set(input.brand),
            stock: Set(input.stock),
            sku: Set(input.sku),
            images: Set(ProductImages(images)),
            seller_id: Set(seller.user_id),
            average_rating: Set(Decimal::ZERO),
            num_reviews: Set(0),
            rating_distribution: Set(RatingDistribution::default()),
            tags: Set(Tags(input.tags)),
            is_featured: Set(input.is_featured),
            is_active: Set(true),
            sold_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %product.id, slug = %product.slug, "product created");
        self.event_sender
            .send_or_log(Event::ProductCreated(product.id))
            .await;
        Ok(product)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user: &AuthUser,
        id: Uuid,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;
        ensure_owner(user, &existing, "update")?;

        let price = input.price.unwrap_or(existing.price);
        let discount = if input.remove_discount {
            None
        } else {
            input.discount_price.or(existing.discount_price)
        };
        check_discount(price, discount)?;

        if let Some(category_id) = input.category_id {
            CategoryEntity::find_by_id(category_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Category not found".into()))?;
        }

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(short) = input.short_description {
            active.short_description = Set(Some(short));
        }
        active.price = Set(price);
        active.discount_price = Set(discount);
        if let Some(category_id) = input.category_id {
            active.category_id = Set(category_id);
        }
        if let Some(brand) = input.brand {
            active.brand = Set(Some(brand));
        }
        if let Some(stock) = input.stock {
            active.stock = Set(stock);
        }
        if let Some(sku) = input.sku {
            active.sku = Set(Some(sku));
        }
        if let Some(images) = input.images {
            active.images = Set(ProductImages(images));
        }
        if let Some(tags) = input.tags {
            active.tags = Set(Tags(tags));
        }
        if let Some(featured) = input.is_featured {
            active.is_featured = Set(featured);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        let product = active.update(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::ProductUpdated(product.id))
            .await;
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get(id).await?;
        ensure_owner(user, &existing, "delete")?;
        existing.delete(&*self.db).await?;

        info!(product_id = %id, "product deleted");
        self.event_sender.send_or_log(Event::ProductDeleted(id)).await;
        Ok(())
    }

    /// Flips `is_active`.
    #[instrument(skip(self))]
    pub async fn toggle_status(
        &self,
        user: &AuthUser,
        id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        let existing = self.get(id).await?;
        ensure_owner(user, &existing, "update")?;

        let next = !existing.is_active;
        let mut active: product::ActiveModel = existing.into();
        active.is_active = Set(next);
        active.updated_at = Set(Utc::now());
        let product = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(product.id))
            .await;
        Ok(product)
    }

    async fn resolve_category(
        &self,
        identifier: &str,
    ) -> Result<Option<category::Model>, ServiceError> {
        Ok(match Uuid::parse_str(identifier) {
            Ok(id) => CategoryEntity::find_by_id(id).one(&*self.db).await?,
            Err(_) => {
                CategoryEntity::find()
                    .filter(category::Column::Slug.eq(identifier))
                    .one(&*self.db)
                    .await?
            }
        })
    }

    async fn unique_slug(&self, base: &str) -> Result<String, ServiceError> {
        let base = if base.is_empty() { "product" } else { base };
        let taken = ProductEntity::find()
            .filter(product::Column::Slug.eq(base))
            .count(&*self.db)
            .await?;
        if taken == 0 {
            return Ok(base.to_string());
        }
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("{}-{}", base, &suffix[..6]))
    }

    async fn paginate(
        &self,
        select: Select<ProductEntity>,
        page: u64,
        limit: u64,
    ) -> Result<ProductPage, ServiceError> {
        let paginator = select.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;

        Ok(ProductPage {
            count: products.len(),
            total,
            page,
            total_pages: total.div_ceil(limit),
            products,
        })
    }
}

fn ensure_owner(user: &AuthUser, product: &product::Model, action: &str) -> Result<(), ServiceError> {
    if user.is_admin() || product.seller_id == user.user_id {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "Not authorized to {} this product",
            action
        )))
    }
}

fn apply_sort(select: Select<ProductEntity>, sort: Option<&str>) -> Select<ProductEntity> {
    match sort {
        Some("price_asc") => select.order_by_asc(product::Column::Price),
        Some("price_desc") => select.order_by_desc(product::Column::Price),
        Some("rating") => select.order_by_desc(product::Column::AverageRating),
        Some("popular") => select.order_by_desc(product::Column::SoldCount),
        Some("oldest") => select.order_by_asc(product::Column::CreatedAt),
        _ => select.order_by_desc(product::Column::CreatedAt),
    }
}

/// One-based page and a bounded page size.
pub fn page_params(page: Option<u64>, limit: Option<u64>) -> (u64, u64) {
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    let limit = limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    (page, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Brass Desk Lamp"), "brass-desk-lamp");
        assert_eq!(slugify("  USB-C  Cable (2m)! "), "usb-c-cable-2m");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn discount_must_be_below_price() {
        assert!(check_discount(dec!(100), Some(dec!(99.99))).is_ok());
        assert!(check_discount(dec!(100), None).is_ok());
        assert!(check_discount(dec!(100), Some(dec!(100))).is_err());
        assert!(check_discount(dec!(100), Some(dec!(-1))).is_err());
    }

    #[test]
    fn page_params_are_bounded() {
        assert_eq!(page_params(None, None), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(page_params(Some(0), Some(0)), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(page_params(Some(3), Some(1000)), (3, MAX_PAGE_SIZE));
    }
}
