//! Category and membership commands

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::context::RequestContext;
use crate::application::unit_of_work::UnitOfWork;
use crate::domain::category::{Category, CategoryMembership, CategoryReader, CategoryWriter};
use crate::domain::node::NodeReader;
use crate::domain::values::{CategoryId, Color, NodeId, UserId, Version};
use crate::error::{Error, Result, ResultExt};
use crate::infrastructure::idempotency::IdempotencyKey;

use super::CommandServices;

const CREATE_CATEGORY: &str = "create_category";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateCategoryCommand {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl CreateCategoryCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Absent fields stay as they are; `description: Some(None)` clears it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCategoryCommand {
    pub category_id: CategoryId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl UpdateCategoryCommand {
    pub fn new(category_id: CategoryId) -> Self {
        Self {
            category_id,
            name: None,
            description: None,
            color: None,
            expected_version: None,
        }
    }
}

/// Handles category writes
#[derive(Clone)]
pub struct CategoryCommandHandler {
    services: CommandServices,
}

impl CategoryCommandHandler {
    pub fn new(services: CommandServices) -> Self {
        Self { services }
    }

    pub async fn create_category(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        command: CreateCategoryCommand,
    ) -> Result<Category> {
        let color = command
            .color
            .as_deref()
            .map(Color::new)
            .transpose()
            .context("validate")?;
        let mut category = Category::create(
            user_id.clone(),
            &command.name,
            command.description.as_deref(),
            color,
        )
        .context("validate")?;

        let key = match command.idempotency_key {
            Some(_) => Some(IdempotencyKey::for_command(user_id, CREATE_CATEGORY, &command)?),
            None => None,
        };
        if let Some(existing) = self.services.replay(key.as_ref()).await? {
            return Ok(existing);
        }

        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;
        uow.categories()
            .insert(&category)
            .await
            .context("stage category")?;
        uow.publish_events(category.take_events());
        if let Some(key) = &key {
            let record = self
                .services
                .idempotency
                .record(key, serde_json::to_value(&category)?)?;
            uow.stage_idempotency(record);
        }

        match uow.commit(ctx).await.context("commit") {
            Ok(()) => {}
            Err(e) if e.is_conflict() && key.is_some() => {
                return match self.services.replay(key.as_ref()).await? {
                    Some(existing) => Ok(existing),
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        }
        self.services.invalidate(user_id);

        info!(user_id = %user_id, category_id = %category.id, "Category created");
        Ok(category)
    }

    pub async fn update_category(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        command: UpdateCategoryCommand,
    ) -> Result<Category> {
        let color = command
            .color
            .as_deref()
            .map(Color::new)
            .transpose()
            .context("validate")?;
        let expected = command
            .expected_version
            .map(Version::new)
            .transpose()
            .context("validate")?;

        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;
        let mut category = load_category(&mut uow, user_id, command.category_id).await?;
        category.ensure_owned_by(user_id, "update")?;
        if let Some(expected) = expected {
            if category.version != expected {
                return Err(Error::conflict(
                    "category",
                    category.id,
                    format!("expected {}, found {}", expected, category.version),
                ));
            }
        }

        let loaded_version = category.version;
        let description = command.description.as_ref().map(|d| d.as_deref());
        let changed = category
            .update(command.name.as_deref(), description, color)
            .context("validate")?;
        if !changed {
            return Ok(category);
        }

        uow.categories()
            .update(&category, loaded_version)
            .await
            .context("stage category")?;
        uow.publish_events(category.take_events());
        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            category_id = %category.id,
            version = category.version.value(),
            "Category updated"
        );
        Ok(category)
    }

    /// Delete a category and its memberships; returns how many memberships
    /// were removed
    pub async fn delete_category(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        category_id: CategoryId,
    ) -> Result<usize> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;
        let mut category = load_category(&mut uow, user_id, category_id).await?;
        category.ensure_owned_by(user_id, "delete")?;

        let members = uow
            .categories()
            .members(user_id, category_id)
            .await
            .context("load memberships")?;
        for membership in &members {
            uow.categories()
                .remove_member(membership)
                .await
                .context("stage membership delete")?;
            uow.publish_event(membership.removed_event());
        }
        category.mark_deleted();
        uow.categories()
            .delete(&category)
            .await
            .context("stage category delete")?;
        // an assignment committed after the members were read fails the delete
        uow.categories()
            .expect_no_members(user_id, category_id)
            .await
            .context("stage membership check")?;
        uow.publish_events(category.take_events());

        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            category_id = %category_id,
            memberships_removed = members.len(),
            "Category deleted"
        );
        Ok(members.len())
    }

    /// Put a node into a category; assigning twice is a no-op
    pub async fn assign_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        category_id: CategoryId,
        node_id: NodeId,
    ) -> Result<CategoryMembership> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        load_category(&mut uow, user_id, category_id).await?;
        uow.nodes()
            .get(user_id, node_id)
            .await
            .context("load node")?
            .ok_or_else(|| Error::not_found("node", node_id))?;

        let existing = uow
            .categories()
            .memberships_of(user_id, node_id)
            .await
            .context("load memberships")?
            .into_iter()
            .find(|m| m.category_id == category_id);
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let membership = CategoryMembership::new(user_id.clone(), category_id, node_id);
        uow.categories()
            .add_member(&membership)
            .await
            .context("stage membership")?;
        uow.publish_event(membership.added_event());
        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            category_id = %category_id,
            node_id = %node_id,
            "Node assigned to category"
        );
        Ok(membership)
    }

    /// Remove a node from a category; returns false if it was not a member
    pub async fn unassign_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        category_id: CategoryId,
        node_id: NodeId,
    ) -> Result<bool> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let existing = uow
            .categories()
            .memberships_of(user_id, node_id)
            .await
            .context("load memberships")?
            .into_iter()
            .find(|m| m.category_id == category_id);
        let Some(membership) = existing else {
            return Ok(false);
        };

        uow.categories()
            .remove_member(&membership)
            .await
            .context("stage membership delete")?;
        uow.publish_event(membership.removed_event());
        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            category_id = %category_id,
            node_id = %node_id,
            "Node removed from category"
        );
        Ok(true)
    }
}

async fn load_category(
    uow: &mut UnitOfWork,
    user_id: &UserId,
    category_id: CategoryId,
) -> Result<Category> {
    uow.categories()
        .get(user_id, category_id)
        .await
        .context("load category")?
        .ok_or_else(|| Error::not_found("category", category_id))
}
