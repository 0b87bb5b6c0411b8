//! Reader and writer ports for nodes
//!
//! Readers go to the store directly. Writers stage operations that become
//! visible only when the surrounding unit of work commits.

use async_trait::async_trait;

use crate::domain::page::{Page, PageRequest};
use crate::domain::values::{NodeId, UserId, Version};
use crate::error::Result;

use super::entity::Node;

/// Read access to a user's nodes
#[async_trait]
pub trait NodeReader: Send + Sync {
    /// Get a node by id, `None` if the user has no such node
    async fn get(&self, user_id: &UserId, node_id: NodeId) -> Result<Option<Node>>;

    /// List nodes in id order, one page at a time
    async fn list(&self, user_id: &UserId, page: &PageRequest) -> Result<Page<Node>>;

    /// Load every node of the user (the analyzer corpus)
    async fn list_all(&self, user_id: &UserId) -> Result<Vec<Node>>;
}

/// Staged writes of nodes
#[async_trait]
pub trait NodeWriter: Send {
    /// Stage the insert of a new node; fails at commit if the id is taken
    async fn insert(&mut self, node: &Node) -> Result<()>;

    /// Stage a full rewrite guarded by the version the caller loaded
    async fn update(&mut self, node: &Node, expected: Version) -> Result<()>;

    /// Stage the removal of a node at its current version
    async fn delete(&mut self, node: &Node) -> Result<()>;
}
