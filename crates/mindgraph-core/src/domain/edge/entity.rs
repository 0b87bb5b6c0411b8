//! Edge aggregate
//!
//! An edge is a directed, weighted link between two nodes of the same
//! user. Its identity is the `(user, source, target)` triple.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::GraphEvent;
use crate::domain::node::Node;
use crate::domain::values::{NodeId, UserId, Version, Weight};
use crate::error::{Error, Result};

/// A directed link between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub user_id: UserId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub weight: Weight,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<GraphEvent>,
}

impl Edge {
    /// Create an edge from raw identifiers
    pub fn create(user_id: UserId, source_id: NodeId, target_id: NodeId, weight: Weight) -> Result<Self> {
        if source_id == target_id {
            return Err(Error::validation(
                "edge",
                format!("node {} cannot be connected to itself", source_id),
            ));
        }

        let now = Utc::now();
        let mut edge = Self {
            user_id,
            source_id,
            target_id,
            weight,
            version: Version::INITIAL,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        edge.events.push(GraphEvent::EdgeCreated {
            user_id: edge.user_id.clone(),
            source_id,
            target_id,
            weight: weight.value(),
            timestamp: now,
        });
        Ok(edge)
    }

    /// Create an edge between two loaded nodes, checking they share an owner
    pub fn between(source: &Node, target: &Node, weight: Weight) -> Result<Self> {
        if source.user_id != target.user_id {
            return Err(Error::unauthorized(
                format!("edge {} -> {}", source.id, target.id),
                "connect nodes owned by different users",
            ));
        }
        Self::create(source.user_id.clone(), source.id, target.id, weight)
    }

    /// True if this edge touches the given node on either end
    pub fn touches(&self, node_id: NodeId) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }

    /// The endpoint opposite to `node_id`
    pub fn other_end(&self, node_id: NodeId) -> NodeId {
        if self.source_id == node_id {
            self.target_id
        } else {
            self.source_id
        }
    }

    /// Change the weight; returns false when nothing changed
    pub fn reweight(&mut self, weight: Weight) -> bool {
        if (self.weight.value() - weight.value()).abs() < f64::EPSILON {
            return false;
        }
        let old = self.weight;
        self.weight = weight;
        self.version = self.version.next();
        self.updated_at = Utc::now();
        self.events.push(GraphEvent::EdgeReweighted {
            user_id: self.user_id.clone(),
            source_id: self.source_id,
            target_id: self.target_id,
            old_weight: old.value(),
            new_weight: weight.value(),
            timestamp: self.updated_at,
        });
        true
    }

    /// Record the deletion of this edge
    pub fn mark_deleted(&mut self) {
        self.events.push(GraphEvent::EdgeDeleted {
            user_id: self.user_id.clone(),
            source_id: self.source_id,
            target_id: self.target_id,
            timestamp: Utc::now(),
        });
    }

    /// Drain recorded events
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }
}
