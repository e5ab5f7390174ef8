use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::review::ReviewStatus,
    errors::ServiceError,
    handlers::common::{ack, created_response, message_response, success_response, JsonBody},
    services::reviews::{AdminReviewQuery, CreateReviewInput, ReviewQuery, UpdateReviewInput},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct MyReviewsQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseInput {
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusInput {
    pub status: Option<String>,
}

pub fn reviews_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/product/:product_id", get(product_reviews))
        .route("/:id", get(get_review));

    let members = Router::new()
        .route("/", post(create_review))
        .route("/:id", axum::routing::put(update_review).delete(delete_review))
        .route("/:id/helpful", post(mark_helpful).delete(unmark_helpful))
        .route("/my/reviews", get(my_reviews))
        .with_auth();

    let sellers = Router::new()
        .route("/:id/response", post(respond_to_review))
        .with_any_role(&["seller", "admin"]);

    let admin = Router::new()
        .route("/admin/all", get(all_reviews))
        .route("/:id/status", patch(update_review_status))
        .with_role("admin");

    public.merge(members).merge(sellers).merge(admin)
}

pub async fn product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<ReviewQuery>,
) -> Result<Response, ServiceError> {
    let page = state.services.reviews.for_product(product_id, query).await?;
    Ok(success_response(page))
}

pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let review = state.services.reviews.get(id).await?;
    Ok(success_response(json!({ "review": review })))
}

pub async fn create_review(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(input): JsonBody<CreateReviewInput>,
) -> Result<Response, ServiceError> {
    let review = state.services.reviews.create(user.user_id, input).await?;
    Ok(created_response(
        "Review created successfully",
        json!({ "review": review }),
    ))
}

pub async fn update_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<UpdateReviewInput>,
) -> Result<Response, ServiceError> {
    let review = state
        .services
        .reviews
        .update(user.user_id, id, input)
        .await?;
    Ok(message_response(
        "Review updated successfully",
        json!({ "review": review }),
    ))
}

pub async fn delete_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.reviews.delete(&user, id).await?;
    Ok(ack("Review deleted successfully"))
}

pub async fn mark_helpful(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let count = state.services.reviews.mark_helpful(user.user_id, id).await?;
    Ok(message_response(
        "Review marked as helpful",
        json!({ "helpfulCount": count }),
    ))
}

pub async fn unmark_helpful(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let count = state
        .services
        .reviews
        .unmark_helpful(user.user_id, id)
        .await?;
    Ok(message_response(
        "Review unmarked as helpful",
        json!({ "helpfulCount": count }),
    ))
}

pub async fn my_reviews(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MyReviewsQuery>,
) -> Result<Response, ServiceError> {
    let page = state
        .services
        .reviews
        .mine(user.user_id, query.page, query.limit)
        .await?;
    Ok(success_response(page))
}

pub async fn respond_to_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<ResponseInput>,
) -> Result<Response, ServiceError> {
    let review = state
        .services
        .reviews
        .respond(&user, id, input.message)
        .await?;
    Ok(message_response(
        "Response added successfully",
        json!({ "review": review }),
    ))
}

pub async fn all_reviews(
    State(state): State<AppState>,
    Query(query): Query<AdminReviewQuery>,
) -> Result<Response, ServiceError> {
    let page = state.services.reviews.admin_list(query).await?;
    Ok(success_response(page))
}

pub async fn update_review_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<StatusInput>,
) -> Result<Response, ServiceError> {
    let status = match input.status.as_deref() {
        Some("pending") => ReviewStatus::Pending,
        Some("approved") => ReviewStatus::Approved,
        Some("rejected") => ReviewStatus::Rejected,
        _ => return Err(ServiceError::BadRequest("Invalid status".into())),
    };
    let review = state.services.reviews.set_status(id, status).await?;
    Ok(message_response(
        "Review status updated",
        json!({ "review": review }),
    ))
}
