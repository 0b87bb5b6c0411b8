//! Node aggregate
//!
//! A node is a short piece of user text. Its keyword set is always derived
//! from its content and is never written independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::GraphEvent;
use crate::domain::values::{Content, Keywords, NodeId, Tags, Title, UserId, Version};
use crate::error::{Error, Result};

/// A node in a user's knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub user_id: UserId,
    pub title: Title,
    pub content: Content,
    pub keywords: Keywords,
    pub tags: Tags,
    pub version: Version,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<GraphEvent>,
}

/// Sparse set of changes applied to a node
#[derive(Debug, Clone, Default)]
pub struct NodeChanges {
    pub title: Option<Title>,
    pub content: Option<Content>,
    pub tags: Option<Tags>,
}

impl NodeChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none()
    }
}

/// What an applied change actually touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub title: bool,
    pub content: bool,
    pub tags: bool,
}

impl AppliedChanges {
    pub fn any(&self) -> bool {
        self.title || self.content || self.tags
    }

    /// True when connection discovery must be re-run
    pub fn affects_connections(&self) -> bool {
        self.content || self.tags
    }

    fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.title {
            names.push("title".to_string());
        }
        if self.content {
            names.push("content".to_string());
        }
        if self.tags {
            names.push("tags".to_string());
        }
        names
    }
}

impl Node {
    /// Create a new node, recording a `NodeCreated` event
    pub fn create(user_id: UserId, title: Title, content: Content, tags: Tags) -> Self {
        let now = Utc::now();
        let keywords = content.keywords();
        let id = NodeId::generate();

        let mut node = Self {
            id,
            user_id,
            title,
            content,
            keywords,
            tags,
            version: Version::INITIAL,
            archived: false,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        node.events.push(GraphEvent::NodeCreated {
            user_id: node.user_id.clone(),
            node_id: node.id,
            keywords: node.keywords.iter().cloned().collect(),
            timestamp: now,
        });
        node
    }

    /// Check that `user_id` owns this node
    pub fn ensure_owned_by(&self, user_id: &UserId, action: &str) -> Result<()> {
        if &self.user_id != user_id {
            return Err(Error::unauthorized(format!("node {}", self.id), action));
        }
        Ok(())
    }

    /// Check the caller's expected version against the loaded one
    pub fn ensure_version(&self, expected: Version) -> Result<()> {
        if self.version != expected {
            return Err(Error::conflict(
                "node",
                self.id,
                format!("expected {}, found {}", expected, self.version),
            ));
        }
        Ok(())
    }

    /// Apply changes; bumps the version when anything changed
    ///
    /// Content changes always re-derive the keyword set.
    pub fn apply(&mut self, changes: NodeChanges) -> Result<AppliedChanges> {
        if self.archived {
            return Err(Error::validation(
                "node",
                format!("node {} is archived and cannot be modified", self.id),
            ));
        }

        let mut applied = AppliedChanges::default();
        if let Some(title) = changes.title {
            if title != self.title {
                self.title = title;
                applied.title = true;
            }
        }
        if let Some(content) = changes.content {
            if content != self.content {
                self.keywords = content.keywords();
                self.content = content;
                applied.content = true;
            }
        }
        if let Some(tags) = changes.tags {
            if tags != self.tags {
                self.tags = tags;
                applied.tags = true;
            }
        }

        if applied.any() {
            self.touch();
            self.events.push(GraphEvent::NodeUpdated {
                user_id: self.user_id.clone(),
                node_id: self.id,
                version: self.version.value(),
                changes: applied.names(),
                timestamp: self.updated_at,
            });
        }
        Ok(applied)
    }

    /// Archive the node; archived nodes reject further changes
    pub fn archive(&mut self) -> Result<()> {
        if self.archived {
            return Err(Error::validation(
                "node",
                format!("node {} is already archived", self.id),
            ));
        }
        self.archived = true;
        self.touch();
        self.events.push(GraphEvent::NodeArchived {
            user_id: self.user_id.clone(),
            node_id: self.id,
            timestamp: self.updated_at,
        });
        Ok(())
    }

    /// Record the deletion of this node
    pub fn mark_deleted(&mut self, edges_removed: usize) {
        self.events.push(GraphEvent::NodeDeleted {
            user_id: self.user_id.clone(),
            node_id: self.id,
            edges_removed,
            timestamp: Utc::now(),
        });
    }

    /// Drain recorded events
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    fn touch(&mut self) {
        self.version = self.version.next();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn node(content: &str) -> Node {
        Node::create(
            UserId::new("alice").unwrap(),
            Title::new("A note").unwrap(),
            Content::new(content).unwrap(),
            Tags::new(["rust"]).unwrap(),
        )
    }

    #[test]
    fn test_create_derives_keywords_and_records_event() {
        let mut node = node("Hexagonal architecture with ports");
        assert_eq!(node.version, Version::INITIAL);
        assert!(node.keywords.contains("hexagonal"));
        assert!(node.keywords.contains("ports"));

        let events = node.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type_name(), "node_created");
        assert!(node.take_events().is_empty());
    }

    #[test]
    fn test_content_change_rederives_keywords() {
        let mut node = node("Hexagonal architecture");
        let applied = node
            .apply(NodeChanges {
                content: Some(Content::new("Event sourcing journal").unwrap()),
                ..Default::default()
            })
            .unwrap();

        assert!(applied.content);
        assert!(applied.affects_connections());
        assert!(node.keywords.contains("sourcing"));
        assert!(!node.keywords.contains("hexagonal"));
        assert_eq!(node.version.value(), 2);
    }

    #[test]
    fn test_noop_change_keeps_version() {
        let mut node = node("Hexagonal architecture");
        let applied = node
            .apply(NodeChanges {
                title: Some(Title::new("A note").unwrap()),
                ..Default::default()
            })
            .unwrap();

        assert!(!applied.any());
        assert_eq!(node.version, Version::INITIAL);
    }

    #[test]
    fn test_archived_node_rejects_changes() {
        let mut node = node("Hexagonal architecture");
        node.archive().unwrap();

        let err = node
            .apply(NodeChanges {
                title: Some(Title::new("Other").unwrap()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(node.archive().is_err());
    }

    #[test]
    fn test_ownership_and_version_checks() {
        let node = node("Hexagonal architecture");
        let bob = UserId::new("bob").unwrap();

        assert_eq!(
            node.ensure_owned_by(&bob, "update").unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        assert!(node.ensure_version(Version::INITIAL).is_ok());
        assert!(node.ensure_version(Version::INITIAL.next()).unwrap_err().is_conflict());
    }

    #[test]
    fn test_serde_roundtrip_skips_events() {
        let node = node("Hexagonal architecture");
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("events").is_none());

        let mut back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, node.id);
        assert!(back.take_events().is_empty());
    }
}
