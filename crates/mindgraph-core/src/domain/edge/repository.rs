//! Reader and writer ports for edges

use async_trait::async_trait;

use crate::domain::values::{NodeId, UserId, Version};
use crate::error::Result;

use super::entity::Edge;

/// Read access to a user's edges
#[async_trait]
pub trait EdgeReader: Send + Sync {
    /// Get the edge `source -> target`
    async fn get(&self, user_id: &UserId, source_id: NodeId, target_id: NodeId)
    -> Result<Option<Edge>>;

    /// Edges leaving `source_id`
    async fn outgoing(&self, user_id: &UserId, source_id: NodeId) -> Result<Vec<Edge>>;

    /// Edges arriving at `target_id`
    async fn incoming(&self, user_id: &UserId, target_id: NodeId) -> Result<Vec<Edge>>;

    /// Every edge of the user
    async fn list_all(&self, user_id: &UserId) -> Result<Vec<Edge>>;
}

/// Staged writes of edges
#[async_trait]
pub trait EdgeWriter: Send {
    /// Stage a new edge; commit fails unless both endpoints exist
    async fn insert(&mut self, edge: &Edge) -> Result<()>;

    /// Stage a weight change as a partial update guarded by `expected`
    async fn update_weight(&mut self, edge: &Edge, expected: Version) -> Result<()>;

    /// Stage the removal of an edge at its current version
    async fn delete(&mut self, edge: &Edge) -> Result<()>;

    /// Stage a check that no edge starts or ends at `node_id` once the
    /// earlier staged writes apply
    async fn expect_detached(&mut self, user_id: &UserId, node_id: NodeId) -> Result<()>;
}
