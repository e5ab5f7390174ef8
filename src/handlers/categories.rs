use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::AuthRouterExt,
    errors::ServiceError,
    handlers::common::{ack, created_response, message_response, success_response, JsonBody},
    services::{
        categories::{CategoryInput, CategoryQuery, UpdateCategoryInput},
        products::ProductQuery,
    },
    AppState,
};

pub fn categories_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/", get(list_categories))
        .route("/tree", get(category_tree))
        .route("/:id", get(get_category))
        .route("/:id/products", get(category_products));

    let admin = Router::new()
        .route("/", post(create_category))
        .route("/:id", axum::routing::put(update_category).delete(delete_category))
        .route("/:id/toggle-status", patch(toggle_category_status))
        .with_role("admin");

    public.merge(admin)
}

pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> Result<Response, ServiceError> {
    let categories = state.services.categories.list(query).await?;
    Ok(success_response(json!({
        "count": categories.len(),
        "categories": categories,
    })))
}

pub async fn category_tree(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let tree = state.services.categories.tree().await?;
    Ok(success_response(json!({ "categories": tree })))
}

/// Id or slug, with subcategories and the breadcrumb path.
pub async fn get_category(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, ServiceError> {
    let detail = state.services.categories.detail(&identifier).await?;
    Ok(success_response(json!({ "category": detail })))
}

pub async fn category_products(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<ProductQuery>,
) -> Result<Response, ServiceError> {
    let category = state.services.categories.find(&identifier).await?;
    let page = state
        .services
        .products
        .list(ProductQuery {
            category: Some(category.id.to_string()),
            ..query
        })
        .await?;
    Ok(success_response(page))
}

pub async fn create_category(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CategoryInput>,
) -> Result<Response, ServiceError> {
    let category = state.services.categories.create(input).await?;
    Ok(created_response(
        "Category created successfully",
        json!({ "category": category }),
    ))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<UpdateCategoryInput>,
) -> Result<Response, ServiceError> {
    let category = state.services.categories.update(id, input).await?;
    Ok(message_response(
        "Category updated successfully",
        json!({ "category": category }),
    ))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.categories.delete(id).await?;
    Ok(ack("Category deleted successfully"))
}

pub async fn toggle_category_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let category = state.services.categories.toggle_status(id).await?;
    let message = if category.is_active {
        "Category activated successfully"
    } else {
        "Category deactivated successfully"
    };
    Ok(message_response(message, json!({ "category": category })))
}
