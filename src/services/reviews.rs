use crate::{
    auth::AuthUser,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        product::{self, Entity as ProductEntity, RatingDistribution},
        review::{self, Entity as ReviewEntity, ReviewImages, ReviewResponse, ReviewStatus},
        review_helpful::{self, Entity as HelpfulEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

const DEFAULT_LIMIT: u64 = 10;
const ADMIN_DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub rating: Option<i32>,
    pub verified: Option<bool>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminReviewQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<ReviewStatus>,
    pub rating: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewInput {
    pub product: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(max = 100, message = "Title cannot exceed 100 characters"))]
    pub title: Option<String>,
    #[validate(length(
        min = 1,
        max = 1000,
        message = "Comment is required and cannot exceed 1000 characters"
    ))]
    pub comment: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateReviewInput {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: Option<i32>,
    #[validate(length(max = 100, message = "Title cannot exceed 100 characters"))]
    pub title: Option<String>,
    #[validate(length(
        min = 1,
        max = 1000,
        message = "Comment is required and cannot exceed 1000 characters"
    ))]
    pub comment: Option<String>,
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RatingBucket {
    pub rating: i32,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPage {
    pub count: usize,
    pub total: u64,
    pub page: u64,
    pub total_pages: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_summary: Option<Vec<RatingBucket>>,
    pub reviews: Vec<review::Model>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReviewStats {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminReviewPage {
    #[serde(flatten)]
    pub page: ReviewPage,
    pub stats: ReviewStats,
}

/// Aggregate rating of a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingStats {
    pub average: Decimal,
    pub count: i32,
    pub distribution: RatingDistribution,
}

impl RatingStats {
    /// Average to one decimal, half away from zero. No ratings gives zero.
    pub fn from_ratings(ratings: &[i32]) -> Self {
        let mut distribution = RatingDistribution::default();
        for r in ratings {
            distribution.record(*r);
        }
        let count = ratings.len() as i32;
        let average = if count == 0 {
            Decimal::ZERO
        } else {
            let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
            (Decimal::from(sum) / Decimal::from(count))
                .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
        };
        Self {
            average,
            count,
            distribution,
        }
    }
}

/// Recomputes rating fields on the product from its approved, active reviews.
pub async fn refresh_product_rating<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<(), ServiceError> {
    let ratings: Vec<i32> = visible(ReviewEntity::find())
        .filter(review::Column::ProductId.eq(product_id))
        .select_only()
        .column(review::Column::Rating)
        .into_tuple()
        .all(conn)
        .await?;
    let stats = RatingStats::from_ratings(&ratings);

    if let Some(product) = ProductEntity::find_by_id(product_id).one(conn).await? {
        let mut active: product::ActiveModel = product.into();
        active.average_rating = Set(stats.average);
        active.num_reviews = Set(stats.count);
        active.rating_distribution = Set(stats.distribution);
        active.update(conn).await?;
    }
    Ok(())
}

fn visible(select: Select<ReviewEntity>) -> Select<ReviewEntity> {
    select
        .filter(review::Column::Status.eq(ReviewStatus::Approved))
        .filter(review::Column::IsActive.eq(true))
}

fn bounded(page: Option<u64>, limit: Option<u64>, default_limit: u64) -> (u64, u64) {
    (
        page.filter(|p| *p > 0).unwrap_or(1),
        limit
            .filter(|l| *l > 0)
            .unwrap_or(default_limit)
            .min(MAX_LIMIT),
    )
}

fn apply_sort(select: Select<ReviewEntity>, sort: Option<&str>) -> Select<ReviewEntity> {
    match sort {
        Some("helpful") => select.order_by_desc(review::Column::HelpfulCount),
        Some("rating_high") => select.order_by_desc(review::Column::Rating),
        Some("rating_low") => select.order_by_asc(review::Column::Rating),
        Some("oldest") => select.order_by_asc(review::Column::CreatedAt),
        _ => select.order_by_desc(review::Column::CreatedAt),
    }
}

#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ReviewService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Approved reviews of a product with a per-rating summary.
    pub async fn for_product(
        &self,
        product_id: Uuid,
        query: ReviewQuery,
    ) -> Result<ReviewPage, ServiceError> {
        let (page, limit) = bounded(query.page, query.limit, DEFAULT_LIMIT);

        let mut select = visible(ReviewEntity::find()).filter(review::Column::ProductId.eq(product_id));
        if let Some(rating) = query.rating {
            select = select.filter(review::Column::Rating.eq(rating));
        }
        if query.verified == Some(true) {
            select = select.filter(review::Column::Verified.eq(true));
        }

        let ratings: Vec<i32> = visible(ReviewEntity::find())
            .filter(review::Column::ProductId.eq(product_id))
            .select_only()
            .column(review::Column::Rating)
            .into_tuple()
            .all(&*self.db)
            .await?;
        let summary = rating_summary(&ratings);

        let mut result = self
            .paginate(apply_sort(select, query.sort.as_deref()), page, limit)
            .await?;
        result.rating_summary = Some(summary);
        Ok(result)
    }

    pub async fn get(&self, id: Uuid) -> Result<review::Model, ServiceError> {
        ReviewEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Review not found".into()))
    }

    /// One review per user and product. `verified` is set when the user has
    /// a delivered order containing the product.
    #[instrument(skip(self, input), fields(product_id = %input.product))]
    pub async fn create(
        &self,
        user_id: Uuid,
        input: CreateReviewInput,
    ) -> Result<review::Model, ServiceError> {
        input.validate()?;

        ProductEntity::find_by_id(input.product)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))?;

        let existing = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(input.product))
            .filter(review::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        if existing > 0 {
            return Err(ServiceError::BadRequest(
                "You have already reviewed this product".into(),
            ));
        }

        let purchase = self.delivered_order_with(user_id, input.product).await?;

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let review = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(input.product),
            user_id: Set(user_id),
            order_id: Set(purchase),
            rating: Set(input.rating),
            title: Set(input.title.filter(|t| !t.trim().is_empty())),
            comment: Set(input.comment.trim().to_string()),
            images: Set(ReviewImages(input.images)),
            helpful_count: Set(0),
            verified: Set(purchase.is_some()),
            status: Set(ReviewStatus::Approved),
            is_active: Set(true),
            response: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        refresh_product_rating(&txn, review.product_id).await?;
        txn.commit().await?;

        info!(review_id = %review.id, "review created");
        self.event_sender
            .send_or_log(Event::ReviewCreated {
                review_id: review.id,
                product_id: review.product_id,
            })
            .await;
        Ok(review)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        input: UpdateReviewInput,
    ) -> Result<review::Model, ServiceError> {
        input.validate()?;
        let review = self.get(id).await?;
        if review.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "Not authorized to update this review".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let mut active: review::ActiveModel = review.into();
        if let Some(rating) = input.rating {
            active.rating = Set(rating);
        }
        if let Some(title) = input.title {
            active.title = Set(Some(title).filter(|t| !t.trim().is_empty()));
        }
        if let Some(comment) = input.comment {
            active.comment = Set(comment.trim().to_string());
        }
        if let Some(images) = input.images {
            active.images = Set(ReviewImages(images));
        }
        active.updated_at = Set(Utc::now());
        let review = active.update(&txn).await?;
        refresh_product_rating(&txn, review.product_id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::ReviewUpdated(review.id)).await;
        Ok(review)
    }

    /// Owner or admin.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let review = self.get(id).await?;
        if !actor.is_admin() && review.user_id != actor.user_id {
            return Err(ServiceError::Forbidden(
                "Not authorized to delete this review".into(),
            ));
        }

        let txn = self.db.begin().await?;
        HelpfulEntity::delete_many()
            .filter(review_helpful::Column::ReviewId.eq(id))
            .exec(&txn)
            .await?;
        ReviewEntity::delete_by_id(id).exec(&txn).await?;
        refresh_product_rating(&txn, review.product_id).await?;
        txn.commit().await?;

        info!(review_id = %id, "review deleted");
        self.event_sender.send_or_log(Event::ReviewDeleted(id)).await;
        Ok(())
    }

    /// Returns the new helpful count.
    pub async fn mark_helpful(&self, user_id: Uuid, id: Uuid) -> Result<i32, ServiceError> {
        self.get(id).await?;

        let voted = HelpfulEntity::find()
            .filter(review_helpful::Column::ReviewId.eq(id))
            .filter(review_helpful::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        if voted > 0 {
            return Err(ServiceError::BadRequest(
                "You have already marked this review as helpful".into(),
            ));
        }

        let txn = self.db.begin().await?;
        review_helpful::ActiveModel {
            id: Set(Uuid::new_v4()),
            review_id: Set(id),
            user_id: Set(user_id),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        let count = sync_helpful_count(&txn, id).await?;
        txn.commit().await?;
        Ok(count)
    }

    /// Removing a vote that was never cast is a no-op.
    pub async fn unmark_helpful(&self, user_id: Uuid, id: Uuid) -> Result<i32, ServiceError> {
        self.get(id).await?;

        let txn = self.db.begin().await?;
        HelpfulEntity::delete_many()
            .filter(review_helpful::Column::ReviewId.eq(id))
            .filter(review_helpful::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        let count = sync_helpful_count(&txn, id).await?;
        txn.commit().await?;
        Ok(count)
    }

    pub async fn mine(
        &self,
        user_id: Uuid,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<ReviewPage, ServiceError> {
        let (page, limit) = bounded(page, limit, DEFAULT_LIMIT);
        let select = ReviewEntity::find()
            .filter(review::Column::UserId.eq(user_id))
            .order_by_desc(review::Column::CreatedAt);
        self.paginate(select, page, limit).await
    }

    /// Seller of the reviewed product, or an admin.
    #[instrument(skip(self, actor, message), fields(user_id = %actor.user_id))]
    pub async fn respond(
        &self,
        actor: &AuthUser,
        id: Uuid,
        message: Option<String>,
    ) -> Result<review::Model, ServiceError> {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Please provide a response message".into()))?;

        let review = self.get(id).await?;
        if !actor.is_admin() {
            let product = ProductEntity::find_by_id(review.product_id)
                .one(&*self.db)
                .await?;
            if product.map(|p| p.seller_id) != Some(actor.user_id) {
                return Err(ServiceError::Forbidden(
                    "Not authorized to respond to this review".into(),
                ));
            }
        }

        let mut active: review::ActiveModel = review.into();
        active.response = Set(Some(ReviewResponse {
            message,
            responded_by: actor.user_id,
            responded_at: Utc::now(),
        }));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Moderation. Rating aggregates follow the new visibility.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ReviewStatus,
    ) -> Result<review::Model, ServiceError> {
        let review = self.get(id).await?;

        let txn = self.db.begin().await?;
        let mut active: review::ActiveModel = review.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        let review = active.update(&txn).await?;
        refresh_product_rating(&txn, review.product_id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::ReviewUpdated(review.id)).await;
        Ok(review)
    }

    pub async fn admin_list(&self, query: AdminReviewQuery) -> Result<AdminReviewPage, ServiceError> {
        let (page, limit) = bounded(query.page, query.limit, ADMIN_DEFAULT_LIMIT);

        let mut select = ReviewEntity::find();
        if let Some(status) = query.status {
            select = select.filter(review::Column::Status.eq(status));
        }
        if let Some(rating) = query.rating {
            select = select.filter(review::Column::Rating.eq(rating));
        }

        let page = self
            .paginate(select.order_by_desc(review::Column::CreatedAt), page, limit)
            .await?;

        let mut stats = ReviewStats::default();
        for (status, slot) in [
            (ReviewStatus::Pending, &mut stats.pending),
            (ReviewStatus::Approved, &mut stats.approved),
            (ReviewStatus::Rejected, &mut stats.rejected),
        ] {
            *slot = ReviewEntity::find()
                .filter(review::Column::Status.eq(status))
                .count(&*self.db)
                .await?;
        }

        Ok(AdminReviewPage { page, stats })
    }

    async fn delivered_order_with(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Uuid>, ServiceError> {
        let delivered = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Delivered))
            .all(&*self.db)
            .await?;
        Ok(delivered
            .into_iter()
            .find(|o| o.items.0.iter().any(|i| i.product == product_id))
            .map(|o| o.id))
    }

    async fn paginate(
        &self,
        select: Select<ReviewEntity>,
        page: u64,
        limit: u64,
    ) -> Result<ReviewPage, ServiceError> {
        let paginator = select.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let reviews = paginator.fetch_page(page - 1).await?;
        Ok(ReviewPage {
            count: reviews.len(),
            total,
            page,
            total_pages: total.div_ceil(limit),
            rating_summary: None,
            reviews,
        })
    }
}

async fn sync_helpful_count<C: ConnectionTrait>(conn: &C, review_id: Uuid) -> Result<i32, ServiceError> {
    let votes = HelpfulEntity::find()
        .filter(review_helpful::Column::ReviewId.eq(review_id))
        .count(conn)
        .await?;
    let count = i32::try_from(votes).unwrap_or(i32::MAX);

    if let Some(review) = ReviewEntity::find_by_id(review_id).one(conn).await? {
        let mut active: review::ActiveModel = review.into();
        active.helpful_count = Set(count);
        active.update(conn).await?;
    }
    Ok(count)
}

/// Counts per star, highest rating first, only ratings that occur.
pub fn rating_summary(ratings: &[i32]) -> Vec<RatingBucket> {
    (1..=5)
        .rev()
        .map(|rating| RatingBucket {
            rating,
            count: ratings.iter().filter(|r| **r == rating).count() as u64,
        })
        .filter(|b| b.count > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stats_average_rounds_to_one_decimal() {
        let stats = RatingStats::from_ratings(&[5, 4, 4]);
        assert_eq!(stats.average, dec!(4.3));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.distribution.four, 2);
        assert_eq!(stats.distribution.five, 1);

        let stats = RatingStats::from_ratings(&[5, 4]);
        assert_eq!(stats.average, dec!(4.5));
    }

    #[test]
    fn stats_of_nothing_are_zero() {
        let stats = RatingStats::from_ratings(&[]);
        assert_eq!(stats.average, Decimal::ZERO);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.distribution, RatingDistribution::default());
    }

    #[test]
    fn summary_lists_present_ratings_high_to_low() {
        assert_eq!(
            rating_summary(&[3, 5, 5, 1]),
            vec![
                RatingBucket { rating: 5, count: 2 },
                RatingBucket { rating: 3, count: 1 },
                RatingBucket { rating: 1, count: 1 },
            ]
        );
    }

    #[test]
    fn create_input_rejects_out_of_range_rating() {
        let input = CreateReviewInput {
            product: Uuid::new_v4(),
            rating: 6,
            title: None,
            comment: "Great lamp".into(),
            images: vec![],
        };
        let err = ServiceError::from(input.validate().unwrap_err());
        assert_eq!(err.to_string(), "Rating must be between 1 and 5");
    }
}
