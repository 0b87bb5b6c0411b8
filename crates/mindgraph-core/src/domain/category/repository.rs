//! Reader and writer ports for categories and memberships

use async_trait::async_trait;

use crate::domain::page::{Page, PageRequest};
use crate::domain::values::{CategoryId, NodeId, UserId, Version};
use crate::error::Result;

use super::entity::{Category, CategoryMembership};

/// Read access to a user's categories
#[async_trait]
pub trait CategoryReader: Send + Sync {
    // ========== Category Operations ==========

    /// Get a category by id
    async fn get(&self, user_id: &UserId, category_id: CategoryId) -> Result<Option<Category>>;

    /// List categories in id order
    async fn list(&self, user_id: &UserId, page: &PageRequest) -> Result<Page<Category>>;

    // ========== Membership Operations ==========

    /// Nodes assigned to a category
    async fn members(&self, user_id: &UserId, category_id: CategoryId)
    -> Result<Vec<CategoryMembership>>;

    /// Categories a node is assigned to
    async fn memberships_of(&self, user_id: &UserId, node_id: NodeId)
    -> Result<Vec<CategoryMembership>>;
}

/// Staged writes of categories and memberships
#[async_trait]
pub trait CategoryWriter: Send {
    // ========== Category Operations ==========

    async fn insert(&mut self, category: &Category) -> Result<()>;

    async fn update(&mut self, category: &Category, expected: Version) -> Result<()>;

    async fn delete(&mut self, category: &Category) -> Result<()>;

    // ========== Membership Operations ==========

    /// Stage an assignment; commit fails unless node and category exist
    async fn add_member(&mut self, membership: &CategoryMembership) -> Result<()>;

    /// Stage the removal of an assignment
    async fn remove_member(&mut self, membership: &CategoryMembership) -> Result<()>;

    /// Stage a check that the category has no members once the earlier
    /// staged writes apply
    async fn expect_no_members(&mut self, user_id: &UserId, category_id: CategoryId) -> Result<()>;

    /// Stage a check that the node belongs to no category once the earlier
    /// staged writes apply
    async fn expect_no_memberships_of(&mut self, user_id: &UserId, node_id: NodeId) -> Result<()>;
}
