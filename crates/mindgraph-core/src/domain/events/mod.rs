//! Domain event infrastructure
//!
//! Aggregates record [`GraphEvent`]s as they change. The unit of work
//! buffers them and hands them to an [`EventPublisher`] only after the
//! store transaction commits, so subscribers never observe a write that
//! was rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

use super::values::{CategoryId, NodeId, UserId};

/// Base trait for all domain events
pub trait DomainEvent: Send + Sync {
    /// Get the event type as a string
    fn event_type(&self) -> &str;

    /// Get the aggregate ID this event belongs to
    fn aggregate_id(&self) -> String;

    /// Get the timestamp when this event occurred
    fn timestamp(&self) -> DateTime<Utc>;

    /// Get the event payload as JSON
    fn payload(&self) -> serde_json::Value;
}

/// Publisher trait for emitting domain events (the event bus)
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()>;

    /// Publish multiple events in order, stopping at the first failure
    async fn publish_all(&self, events: &[&dyn DomainEvent]) -> Result<()> {
        for event in events {
            self.publish(*event).await?;
        }
        Ok(())
    }
}

/// Events raised by the node, edge and category aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GraphEvent {
    NodeCreated {
        user_id: UserId,
        node_id: NodeId,
        keywords: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    NodeUpdated {
        user_id: UserId,
        node_id: NodeId,
        version: u64,
        changes: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    NodeArchived {
        user_id: UserId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeDeleted {
        user_id: UserId,
        node_id: NodeId,
        edges_removed: usize,
        timestamp: DateTime<Utc>,
    },
    EdgeCreated {
        user_id: UserId,
        source_id: NodeId,
        target_id: NodeId,
        weight: f64,
        timestamp: DateTime<Utc>,
    },
    EdgeReweighted {
        user_id: UserId,
        source_id: NodeId,
        target_id: NodeId,
        old_weight: f64,
        new_weight: f64,
        timestamp: DateTime<Utc>,
    },
    EdgeDeleted {
        user_id: UserId,
        source_id: NodeId,
        target_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    CategoryCreated {
        user_id: UserId,
        category_id: CategoryId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    CategoryUpdated {
        user_id: UserId,
        category_id: CategoryId,
        version: u64,
        timestamp: DateTime<Utc>,
    },
    CategoryDeleted {
        user_id: UserId,
        category_id: CategoryId,
        timestamp: DateTime<Utc>,
    },
    NodeCategorized {
        user_id: UserId,
        category_id: CategoryId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeUncategorized {
        user_id: UserId,
        category_id: CategoryId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
}

impl GraphEvent {
    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::NodeCreated { .. } => "node_created",
            Self::NodeUpdated { .. } => "node_updated",
            Self::NodeArchived { .. } => "node_archived",
            Self::NodeDeleted { .. } => "node_deleted",
            Self::EdgeCreated { .. } => "edge_created",
            Self::EdgeReweighted { .. } => "edge_reweighted",
            Self::EdgeDeleted { .. } => "edge_deleted",
            Self::CategoryCreated { .. } => "category_created",
            Self::CategoryUpdated { .. } => "category_updated",
            Self::CategoryDeleted { .. } => "category_deleted",
            Self::NodeCategorized { .. } => "node_categorized",
            Self::NodeUncategorized { .. } => "node_uncategorized",
        }
    }

    /// Owner of the aggregate the event belongs to
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::NodeCreated { user_id, .. }
            | Self::NodeUpdated { user_id, .. }
            | Self::NodeArchived { user_id, .. }
            | Self::NodeDeleted { user_id, .. }
            | Self::EdgeCreated { user_id, .. }
            | Self::EdgeReweighted { user_id, .. }
            | Self::EdgeDeleted { user_id, .. }
            | Self::CategoryCreated { user_id, .. }
            | Self::CategoryUpdated { user_id, .. }
            | Self::CategoryDeleted { user_id, .. }
            | Self::NodeCategorized { user_id, .. }
            | Self::NodeUncategorized { user_id, .. } => user_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::NodeCreated { timestamp, .. }
            | Self::NodeUpdated { timestamp, .. }
            | Self::NodeArchived { timestamp, .. }
            | Self::NodeDeleted { timestamp, .. }
            | Self::EdgeCreated { timestamp, .. }
            | Self::EdgeReweighted { timestamp, .. }
            | Self::EdgeDeleted { timestamp, .. }
            | Self::CategoryCreated { timestamp, .. }
            | Self::CategoryUpdated { timestamp, .. }
            | Self::CategoryDeleted { timestamp, .. }
            | Self::NodeCategorized { timestamp, .. }
            | Self::NodeUncategorized { timestamp, .. } => *timestamp,
        }
    }
}

impl DomainEvent for GraphEvent {
    fn event_type(&self) -> &str {
        self.event_type_name()
    }

    fn aggregate_id(&self) -> String {
        match self {
            Self::NodeCreated { node_id, .. }
            | Self::NodeUpdated { node_id, .. }
            | Self::NodeArchived { node_id, .. }
            | Self::NodeDeleted { node_id, .. } => node_id.to_string(),
            Self::EdgeCreated {
                source_id,
                target_id,
                ..
            }
            | Self::EdgeReweighted {
                source_id,
                target_id,
                ..
            }
            | Self::EdgeDeleted {
                source_id,
                target_id,
                ..
            } => format!("{}->{}", source_id, target_id),
            Self::CategoryCreated { category_id, .. }
            | Self::CategoryUpdated { category_id, .. }
            | Self::CategoryDeleted { category_id, .. }
            | Self::NodeCategorized { category_id, .. }
            | Self::NodeUncategorized { category_id, .. } => category_id.to_string(),
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.occurred_at()
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A stored event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Aggregate ID this event belongs to
    pub aggregate_id: String,
    /// Event type string
    pub event_type: String,
    /// Event data as JSON
    pub data: serde_json::Value,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Create from a domain event
    pub fn from_event(event: &dyn DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            data: event.payload(),
            created_at: event.timestamp(),
        }
    }
}

/// A simple in-memory event store, usable as the event bus in tests and
/// single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    /// Create a new in-memory event store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get events for an aggregate
    pub async fn events_for(&self, aggregate_id: &str) -> Vec<StoredEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect()
    }

    /// Get all events
    pub async fn all_events(&self) -> Vec<StoredEvent> {
        self.events.read().await.clone()
    }

    /// Get events by type
    pub async fn events_by_type(&self, event_type: &str) -> Vec<StoredEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Clear all events
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventStore {
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()> {
        self.events.write().await.push(StoredEvent::from_event(event));
        Ok(())
    }
}
