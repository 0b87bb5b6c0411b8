//! Category queries

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::context::RequestContext;
use crate::config::LimitsConfig;
use crate::domain::category::{Category, CategoryReader};
use crate::domain::node::{Node, NodeReader};
use crate::domain::page::{Page, PageRequest};
use crate::domain::values::{CategoryId, NodeId, UserId};
use crate::error::{Error, Result};
use crate::infrastructure::cache::{CacheKey, QueryCache};
use crate::infrastructure::repository::{StoreCategoryReader, StoreNodeReader};
use crate::storage::store::Store;

use super::{clamp_page, page_params};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDetail {
    pub category: Category,
    pub node_count: usize,
}

/// Cached reads of categories and their members
#[derive(Clone)]
pub struct CategoryQueryService {
    store: Arc<dyn Store>,
    cache: Arc<QueryCache>,
    limits: LimitsConfig,
}

impl CategoryQueryService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<QueryCache>, limits: &LimitsConfig) -> Self {
        Self {
            store,
            cache,
            limits: limits.clone(),
        }
    }

    pub async fn list_categories(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Category>> {
        let page = clamp_page(&self.limits, page);
        let key = CacheKey::new("list_categories", user_id, page_params(&page));
        let store = &*self.store;
        let page = &page;
        ctx.run(
            "list_categories",
            self.cache.get_or_load(key, || async move {
                StoreCategoryReader::new(store).list(user_id, page).await
            }),
        )
        .await
    }

    pub async fn get_category(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        category_id: CategoryId,
    ) -> Result<CategoryDetail> {
        let key = CacheKey::new("get_category", user_id, category_id.to_string());
        let store = &*self.store;
        ctx.run(
            "get_category",
            self.cache.get_or_load(key, || async move {
                let reader = StoreCategoryReader::new(store);
                let category = reader
                    .get(user_id, category_id)
                    .await?
                    .ok_or_else(|| Error::not_found("category", category_id))?;
                let node_count = reader.members(user_id, category_id).await?.len();
                Ok(CategoryDetail {
                    category,
                    node_count,
                })
            }),
        )
        .await
    }

    /// Nodes assigned to a category, in membership order
    pub async fn nodes_in_category(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        category_id: CategoryId,
    ) -> Result<Vec<Node>> {
        let key = CacheKey::new("nodes_in_category", user_id, category_id.to_string());
        let store = &*self.store;
        ctx.run(
            "nodes_in_category",
            self.cache.get_or_load(key, || async move {
                let categories = StoreCategoryReader::new(store);
                if categories.get(user_id, category_id).await?.is_none() {
                    return Err(Error::not_found("category", category_id));
                }
                let nodes = StoreNodeReader::new(store);
                let mut members = Vec::new();
                for membership in categories.members(user_id, category_id).await? {
                    if let Some(node) = nodes.get(user_id, membership.node_id).await? {
                        members.push(node);
                    }
                }
                Ok(members)
            }),
        )
        .await
    }

    pub async fn categories_for_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_id: NodeId,
    ) -> Result<Vec<Category>> {
        let key = CacheKey::new("categories_for_node", user_id, node_id.to_string());
        let store = &*self.store;
        ctx.run(
            "categories_for_node",
            self.cache.get_or_load(key, || async move {
                let reader = StoreCategoryReader::new(store);
                let mut categories = Vec::new();
                for membership in reader.memberships_of(user_id, node_id).await? {
                    if let Some(category) = reader.get(user_id, membership.category_id).await? {
                        categories.push(category);
                    }
                }
                Ok(categories)
            }),
        )
        .await
    }
}
