use crate::{
    entities::{
        category::{self, Entity as CategoryEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    services::products::slugify,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

const MAX_DEPTH: usize = 16;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryQuery {
    pub is_active: Option<bool>,
    /// `null` selects top-level categories
    pub parent: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInput {
    #[validate(length(min = 1, max = 100, message = "Please provide category name"))]
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub image: Option<String>,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryInput {
    #[validate(length(min = 1, max = 100, message = "Please provide category name"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub make_top_level: bool,
    pub image: Option<String>,
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
}

/// Category with its children, recursively.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: category::Model,
    pub children: Vec<CategoryNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathEntry {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryDetail {
    #[serde(flatten)]
    pub category: category::Model,
    pub subcategories: Vec<category::Model>,
    /// Root first, ending with this category
    pub path: Vec<PathEntry>,
}

/// Arranges a flat list into trees rooted at categories without a parent.
/// Children keep the input order.
pub fn build_tree(categories: Vec<category::Model>) -> Vec<CategoryNode> {
    let mut by_parent: HashMap<Option<Uuid>, Vec<category::Model>> = HashMap::new();
    for c in categories {
        by_parent.entry(c.parent_id).or_default().push(c);
    }

    fn attach(
        parent: Option<Uuid>,
        by_parent: &mut HashMap<Option<Uuid>, Vec<category::Model>>,
        depth: usize,
    ) -> Vec<CategoryNode> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }
        let children = by_parent.remove(&parent).unwrap_or_default();
        children
            .into_iter()
            .map(|c| {
                let id = c.id;
                CategoryNode {
                    category: c,
                    children: attach(Some(id), by_parent, depth + 1),
                }
            })
            .collect()
    }

    attach(None, &mut by_parent, 0)
}

#[derive(Clone)]
pub struct CategoryService {
    db: Arc<DatabaseConnection>,
}

impl CategoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list(&self, query: CategoryQuery) -> Result<Vec<category::Model>, ServiceError> {
        let mut select = CategoryEntity::find()
            .filter(category::Column::IsActive.eq(query.is_active.unwrap_or(true)));

        match query.parent.as_deref() {
            Some("null") => select = select.filter(category::Column::ParentId.is_null()),
            Some(raw) => {
                let parent = Uuid::parse_str(raw)
                    .map_err(|_| ServiceError::BadRequest("Invalid parent id".into()))?;
                select = select.filter(category::Column::ParentId.eq(parent));
            }
            None => {}
        }

        if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
            select = select.filter(category::Column::Name.contains(search.trim()));
        }

        Ok(select
            .order_by_asc(category::Column::DisplayOrder)
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn tree(&self) -> Result<Vec<CategoryNode>, ServiceError> {
        let all = CategoryEntity::find()
            .filter(category::Column::IsActive.eq(true))
            .order_by_asc(category::Column::DisplayOrder)
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(build_tree(all))
    }

    /// By id or slug.
    pub async fn find(&self, identifier: &str) -> Result<category::Model, ServiceError> {
        let found = match Uuid::parse_str(identifier) {
            Ok(id) => CategoryEntity::find_by_id(id).one(&*self.db).await?,
            Err(_) => {
                CategoryEntity::find()
                    .filter(category::Column::Slug.eq(identifier))
                    .one(&*self.db)
                    .await?
            }
        };
        found.ok_or_else(|| ServiceError::NotFound("Category not found".into()))
    }

    pub async fn detail(&self, identifier: &str) -> Result<CategoryDetail, ServiceError> {
        let category = self.find(identifier).await?;

        let subcategories = CategoryEntity::find()
            .filter(category::Column::ParentId.eq(category.id))
            .filter(category::Column::IsActive.eq(true))
            .order_by_asc(category::Column::DisplayOrder)
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?;

        let mut path = vec![PathEntry {
            id: category.id,
            name: category.name.clone(),
            slug: category.slug.clone(),
        }];
        let mut parent = category.parent_id;
        while let Some(parent_id) = parent {
            if path.len() > MAX_DEPTH {
                break;
            }
            match CategoryEntity::find_by_id(parent_id).one(&*self.db).await? {
                Some(p) => {
                    parent = p.parent_id;
                    path.push(PathEntry {
                        id: p.id,
                        name: p.name,
                        slug: p.slug,
                    });
                }
                None => break,
            }
        }
        path.reverse();

        Ok(CategoryDetail {
            category,
            subcategories,
            path,
        })
    }

    #[instrument(skip(self, input))]
    pub async fn create(&self, input: CategoryInput) -> Result<category::Model, ServiceError> {
        input.validate()?;
        if let Some(parent_id) = input.parent_id {
            self.ensure_parent(parent_id).await?;
        }

        let slug = slugify(&input.name);
        let exists = CategoryEntity::find()
            .filter(category::Column::Slug.eq(slug.as_str()))
            .count(&*self.db)
            .await?;
        if exists > 0 {
            return Err(ServiceError::BadRequest(
                "Category with this name already exists".into(),
            ));
        }

        let now = Utc::now();
        let category = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            slug: Set(slug),
            description: Set(input.description),
            parent_id: Set(input.parent_id),
            image: Set(input.image),
            is_active: Set(true),
            display_order: Set(input.display_order),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(category_id = %category.id, "category created");
        Ok(category)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateCategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;

        if let Some(parent_id) = input.parent_id {
            if parent_id == id {
                return Err(ServiceError::BadRequest(
                    "A category cannot be its own parent".into(),
                ));
            }
            self.ensure_parent(parent_id).await?;
        }

        let mut active: category::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.slug = Set(slugify(&name));
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if input.make_top_level {
            active.parent_id = Set(None);
        } else if let Some(parent_id) = input.parent_id {
            active.parent_id = Set(Some(parent_id));
        }
        if let Some(image) = input.image {
            active.image = Set(Some(image));
        }
        if let Some(order) = input.display_order {
            active.display_order = Set(order);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get(id).await?;

        let children = CategoryEntity::find()
            .filter(category::Column::ParentId.eq(id))
            .count(&*self.db)
            .await?;
        if children > 0 {
            return Err(ServiceError::BadRequest(
                "Cannot delete category with subcategories. Delete subcategories first.".into(),
            ));
        }

        let products = ProductEntity::find()
            .filter(product::Column::CategoryId.eq(id))
            .count(&*self.db)
            .await?;
        if products > 0 {
            return Err(ServiceError::BadRequest(format!(
                "Cannot delete category with {} products. Remove products first.",
                products
            )));
        }

        existing.delete(&*self.db).await?;
        info!(category_id = %id, "category deleted");
        Ok(())
    }

    pub async fn toggle_status(&self, id: Uuid) -> Result<category::Model, ServiceError> {
        let existing = self.get(id).await?;
        let next = !existing.is_active;
        let mut active: category::ActiveModel = existing.into();
        active.is_active = Set(next);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    async fn get(&self, id: Uuid) -> Result<category::Model, ServiceError> {
        CategoryEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Category not found".into()))
    }

    async fn ensure_parent(&self, parent_id: Uuid) -> Result<(), ServiceError> {
        CategoryEntity::find_by_id(parent_id)
            .one(&*self.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound("Parent category not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, parent: Option<Uuid>) -> category::Model {
        let now = Utc::now();
        category::Model {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slugify(name),
            description: None,
            parent_id: parent,
            image: None,
            is_active: true,
            display_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn tree_nests_children_under_parents() {
        let electronics = category("Electronics", None);
        let phones = category("Phones", Some(electronics.id));
        let android = category("Android", Some(phones.id));
        let books = category("Books", None);

        let tree = build_tree(vec![
            electronics.clone(),
            phones.clone(),
            android.clone(),
            books.clone(),
        ]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].category.id, electronics.id);
        assert_eq!(tree[0].children[0].category.id, phones.id);
        assert_eq!(tree[0].children[0].children[0].category.id, android.id);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn orphans_are_left_out_of_the_tree() {
        let orphan = category("Orphan", Some(Uuid::new_v4()));
        assert!(build_tree(vec![orphan]).is_empty());
    }
}
