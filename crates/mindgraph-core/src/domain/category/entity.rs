//! Category aggregate and node memberships

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::GraphEvent;
use crate::domain::values::{CategoryId, Color, NodeId, UserId, Version};
use crate::error::{Error, Result};

/// Maximum length of a category name, in characters
pub const MAX_CATEGORY_NAME_CHARS: usize = 100;
/// Maximum length of a category description, in characters
pub const MAX_CATEGORY_DESCRIPTION_CHARS: usize = 500;

/// A user-defined grouping of nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub color: Color,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<GraphEvent>,
}

impl Category {
    /// Create a new category
    pub fn create(
        user_id: UserId,
        name: &str,
        description: Option<&str>,
        color: Option<Color>,
    ) -> Result<Self> {
        let name = validate_name(name)?;
        let description = validate_description(description)?;
        let now = Utc::now();

        let mut category = Self {
            id: CategoryId::generate(),
            user_id,
            name,
            description,
            color: color.unwrap_or_default(),
            version: Version::INITIAL,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        category.events.push(GraphEvent::CategoryCreated {
            user_id: category.user_id.clone(),
            category_id: category.id,
            name: category.name.clone(),
            timestamp: now,
        });
        Ok(category)
    }

    /// Check that `user_id` owns this category
    pub fn ensure_owned_by(&self, user_id: &UserId, action: &str) -> Result<()> {
        if &self.user_id != user_id {
            return Err(Error::unauthorized(format!("category {}", self.id), action));
        }
        Ok(())
    }

    /// Update name, description or color; bumps the version on change
    pub fn update(
        &mut self,
        name: Option<&str>,
        description: Option<Option<&str>>,
        color: Option<Color>,
    ) -> Result<bool> {
        let mut changed = false;

        if let Some(name) = name {
            let name = validate_name(name)?;
            if name != self.name {
                self.name = name;
                changed = true;
            }
        }
        if let Some(description) = description {
            let description = validate_description(description)?;
            if description != self.description {
                self.description = description;
                changed = true;
            }
        }
        if let Some(color) = color {
            if color != self.color {
                self.color = color;
                changed = true;
            }
        }

        if changed {
            self.version = self.version.next();
            self.updated_at = Utc::now();
            self.events.push(GraphEvent::CategoryUpdated {
                user_id: self.user_id.clone(),
                category_id: self.id,
                version: self.version.value(),
                timestamp: self.updated_at,
            });
        }
        Ok(changed)
    }

    /// Record the deletion of this category
    pub fn mark_deleted(&mut self) {
        self.events.push(GraphEvent::CategoryDeleted {
            user_id: self.user_id.clone(),
            category_id: self.id,
            timestamp: Utc::now(),
        });
    }

    /// Drain recorded events
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Association between a category and one of the user's nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMembership {
    pub user_id: UserId,
    pub category_id: CategoryId,
    pub node_id: NodeId,
    pub added_at: DateTime<Utc>,
}

impl CategoryMembership {
    pub fn new(user_id: UserId, category_id: CategoryId, node_id: NodeId) -> Self {
        Self {
            user_id,
            category_id,
            node_id,
            added_at: Utc::now(),
        }
    }

    pub fn added_event(&self) -> GraphEvent {
        GraphEvent::NodeCategorized {
            user_id: self.user_id.clone(),
            category_id: self.category_id,
            node_id: self.node_id,
            timestamp: self.added_at,
        }
    }

    pub fn removed_event(&self) -> GraphEvent {
        GraphEvent::NodeUncategorized {
            user_id: self.user_id.clone(),
            category_id: self.category_id,
            node_id: self.node_id,
            timestamp: Utc::now(),
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name", "Category name cannot be empty"));
    }
    if name.chars().count() > MAX_CATEGORY_NAME_CHARS {
        return Err(Error::validation(
            "name",
            format!("Category name must be {} characters or less", MAX_CATEGORY_NAME_CHARS),
        ));
    }
    Ok(name.to_string())
}

fn validate_description(description: Option<&str>) -> Result<Option<String>> {
    let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if description.chars().count() > MAX_CATEGORY_DESCRIPTION_CHARS {
        return Err(Error::validation(
            "description",
            format!(
                "Description must be {} characters or less",
                MAX_CATEGORY_DESCRIPTION_CHARS
            ),
        ));
    }
    Ok(Some(description.to_string()))
}
