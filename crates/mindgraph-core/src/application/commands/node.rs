//! Node commands

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::context::RequestContext;
use crate::application::unit_of_work::UnitOfWork;
use crate::domain::analysis::ConnectionCandidate;
use crate::domain::category::{CategoryReader, CategoryWriter};
use crate::domain::edge::{Edge, EdgeReader, EdgeWriter};
use crate::domain::node::{Node, NodeChanges, NodeReader, NodeWriter};
use crate::domain::values::{Content, NodeId, Tags, Title, UserId, Version, Weight};
use crate::error::{Error, Result, ResultExt};
use crate::infrastructure::idempotency::IdempotencyKey;

use super::CommandServices;

const CREATE_NODE: &str = "create_node";

/// Create one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeCommand {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Client-chosen key; a repeated command with the same key and body
    /// returns the first result instead of creating again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl CreateNodeCommand {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    fn validate(&self) -> Result<(Title, Content, Tags)> {
        Ok((
            Title::new(self.title.as_str())?,
            Content::new(self.content.as_str())?,
            Tags::new(&self.tags)?,
        ))
    }

    fn idempotency_key(&self, user_id: &UserId) -> Result<Option<IdempotencyKey>> {
        match self.idempotency_key {
            Some(_) => Ok(Some(IdempotencyKey::for_command(user_id, CREATE_NODE, self)?)),
            None => Ok(None),
        }
    }
}

/// Change fields of an existing node; absent fields stay as they are
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNodeCommand {
    pub node_id: NodeId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Version the caller last saw. Checked by `update_node`; ignored by
    /// `safe_update_node`, which always applies on top of the latest state.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl UpdateNodeCommand {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            title: None,
            content: None,
            tags: None,
            expected_version: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    fn changes(&self) -> Result<NodeChanges> {
        let changes = NodeChanges {
            title: self.title.as_deref().map(Title::new).transpose()?,
            content: self.content.as_deref().map(Content::new).transpose()?,
            tags: self.tags.as_ref().map(Tags::new).transpose()?,
        };
        if changes.is_empty() {
            return Err(Error::validation("update", "no fields to change"));
        }
        Ok(changes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeResult {
    pub node: Node,
    pub connections: Vec<ConnectionCandidate>,
    /// True when this result was served from the idempotency store
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodeResult {
    pub node_id: NodeId,
    pub edges_removed: usize,
    pub memberships_removed: usize,
}

/// One rejected item of a bulk command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub index: usize,
    pub code: String,
    pub message: String,
}

impl BulkItemFailure {
    fn new(index: usize, error: &Error) -> Self {
        Self {
            index,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkCreateResult {
    /// Created or replayed nodes in input order, failed items left out
    pub nodes: Vec<Node>,
    pub edges_created: usize,
    pub replayed: usize,
    pub failed: Vec<BulkItemFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    pub deleted_count: usize,
    pub failed_ids: Vec<String>,
}

/// Handles node writes
#[derive(Clone)]
pub struct NodeCommandHandler {
    services: CommandServices,
}

impl NodeCommandHandler {
    pub fn new(services: CommandServices) -> Self {
        Self { services }
    }

    // ========== Create ==========

    /// Create a node and connect it to similar existing nodes
    ///
    /// With an idempotency key the result is recorded in the same
    /// transaction; replaying the command returns that result.
    pub async fn create_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        command: CreateNodeCommand,
    ) -> Result<CreateNodeResult> {
        let (title, content, tags) = command.validate().context("validate")?;
        let key = command.idempotency_key(user_id).context("validate")?;

        if let Some(result) = self.replayed(key.as_ref()).await? {
            return Ok(result);
        }

        match self
            .create_once(ctx, user_id, title, content, tags, key.as_ref())
            .await
        {
            // a concurrent duplicate committed first
            Err(e) if e.is_conflict() && key.is_some() => match self.replayed(key.as_ref()).await? {
                Some(result) => Ok(result),
                None => Err(e),
            },
            other => other,
        }
    }

    async fn replayed(&self, key: Option<&IdempotencyKey>) -> Result<Option<CreateNodeResult>> {
        let result: Option<CreateNodeResult> = self.services.replay(key).await?;
        Ok(result.map(|mut result| {
            result.replayed = true;
            result
        }))
    }

    async fn create_once(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        title: Title,
        content: Content,
        tags: Tags,
        key: Option<&IdempotencyKey>,
    ) -> Result<CreateNodeResult> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let corpus = uow.nodes().list_all(user_id).await.context("load corpus")?;
        let mut node = Node::create(user_id.clone(), title, content, tags);
        let connections = self.services.analyzer.find_connections(&node, &corpus);

        uow.nodes().insert(&node).await.context("stage node")?;
        uow.publish_events(node.take_events());
        for candidate in &connections {
            let mut edge = Edge::create(
                user_id.clone(),
                node.id,
                candidate.target_id,
                Weight::from_score(candidate.score),
            )?;
            uow.edges().insert(&edge).await.context("stage edge")?;
            uow.publish_events(edge.take_events());
        }

        let result = CreateNodeResult {
            node,
            connections,
            replayed: false,
        };
        if let Some(key) = key {
            let record = self
                .services
                .idempotency
                .record(key, serde_json::to_value(&result)?)?;
            uow.stage_idempotency(record);
        }

        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            node_id = %result.node.id,
            connections = result.connections.len(),
            "Node created"
        );
        Ok(result)
    }

    // ========== Update ==========

    /// Apply changes in a single attempt
    ///
    /// Fails with `Conflict` when `expected_version` is stale or another
    /// writer commits between load and commit.
    pub async fn update_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        command: UpdateNodeCommand,
    ) -> Result<Node> {
        let changes = command.changes().context("validate")?;
        let expected = command
            .expected_version
            .map(Version::new)
            .transpose()
            .context("validate")?;
        self.update_once(ctx, user_id, command.node_id, changes, expected)
            .await
    }

    /// Apply changes, re-reading and retrying on version conflicts
    pub async fn safe_update_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        command: UpdateNodeCommand,
    ) -> Result<Node> {
        let changes = command.changes().context("validate")?;
        self.services
            .retry
            .run(ctx, "update_node", |_| {
                self.update_once(ctx, user_id, command.node_id, changes.clone(), None)
            })
            .await
    }

    async fn update_once(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_id: NodeId,
        changes: NodeChanges,
        expected: Option<Version>,
    ) -> Result<Node> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let mut node = load_node(&mut uow, user_id, node_id).await?;
        node.ensure_owned_by(user_id, "update")?;
        if let Some(expected) = expected {
            node.ensure_version(expected).context("check version")?;
        }

        let loaded_version = node.version;
        let applied = node.apply(changes).context("apply changes")?;
        if !applied.any() {
            return Ok(node);
        }

        uow.nodes()
            .update(&node, loaded_version)
            .await
            .context("stage node")?;
        uow.publish_events(node.take_events());

        if applied.affects_connections() {
            self.reconnect(&mut uow, &node).await.context("reconnect")?;
        }

        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            node_id = %node.id,
            version = node.version.value(),
            "Node updated"
        );
        Ok(node)
    }

    /// Replace the outgoing edges of `node` with a fresh analysis
    async fn reconnect(&self, uow: &mut UnitOfWork, node: &Node) -> Result<()> {
        let existing = uow.edges().outgoing(&node.user_id, node.id).await?;
        let corpus = uow.nodes().list_all(&node.user_id).await?;
        let candidates = self.services.analyzer.find_connections(node, &corpus);

        let scores: HashMap<NodeId, f64> = candidates
            .iter()
            .map(|candidate| (candidate.target_id, candidate.score))
            .collect();
        let mut kept = HashSet::new();

        for mut edge in existing {
            match scores.get(&edge.target_id) {
                Some(score) => {
                    kept.insert(edge.target_id);
                    let expected = edge.version;
                    if edge.reweight(Weight::from_score(*score)) {
                        uow.edges().update_weight(&edge, expected).await?;
                    }
                }
                None => {
                    edge.mark_deleted();
                    uow.edges().delete(&edge).await?;
                }
            }
            uow.publish_events(edge.take_events());
        }

        for candidate in candidates.iter().filter(|c| !kept.contains(&c.target_id)) {
            let mut edge = Edge::create(
                node.user_id.clone(),
                node.id,
                candidate.target_id,
                Weight::from_score(candidate.score),
            )?;
            uow.edges().insert(&edge).await?;
            uow.publish_events(edge.take_events());
        }
        Ok(())
    }

    // ========== Archive / delete ==========

    /// Archive a node; it keeps its edges but takes no further changes
    pub async fn archive_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_id: NodeId,
    ) -> Result<Node> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let mut node = load_node(&mut uow, user_id, node_id).await?;
        node.ensure_owned_by(user_id, "archive")?;
        let loaded_version = node.version;
        node.archive().context("archive")?;

        uow.nodes()
            .update(&node, loaded_version)
            .await
            .context("stage node")?;
        uow.publish_events(node.take_events());
        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(user_id = %user_id, node_id = %node.id, "Node archived");
        Ok(node)
    }

    /// Delete a node with every edge touching it and its category
    /// memberships, in one transaction
    ///
    /// An edge or membership added by a writer that commits between the
    /// reads and the commit makes the delete fail with `Conflict`.
    pub async fn delete_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_id: NodeId,
    ) -> Result<DeleteNodeResult> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let mut node = load_node(&mut uow, user_id, node_id).await?;
        node.ensure_owned_by(user_id, "delete")?;

        let mut edges = uow
            .edges()
            .outgoing(user_id, node_id)
            .await
            .context("load edges")?;
        edges.extend(
            uow.edges()
                .incoming(user_id, node_id)
                .await
                .context("load edges")?,
        );
        let memberships = uow
            .categories()
            .memberships_of(user_id, node_id)
            .await
            .context("load memberships")?;

        for edge in &mut edges {
            edge.mark_deleted();
            uow.edges().delete(edge).await.context("stage edge delete")?;
            uow.publish_events(edge.take_events());
        }
        for membership in &memberships {
            uow.categories()
                .remove_member(membership)
                .await
                .context("stage membership delete")?;
            uow.publish_event(membership.removed_event());
        }
        node.mark_deleted(edges.len());
        uow.nodes().delete(&node).await.context("stage node delete")?;
        // edges or memberships committed after the reads above fail the delete
        uow.edges()
            .expect_detached(user_id, node_id)
            .await
            .context("stage edge check")?;
        uow.categories()
            .expect_no_memberships_of(user_id, node_id)
            .await
            .context("stage membership check")?;
        uow.publish_events(node.take_events());

        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            node_id = %node_id,
            edges_removed = edges.len(),
            memberships_removed = memberships.len(),
            "Node deleted"
        );
        Ok(DeleteNodeResult {
            node_id,
            edges_removed: edges.len(),
            memberships_removed: memberships.len(),
        })
    }

    // ========== Bulk ==========

    /// Create many nodes in one transaction
    ///
    /// Items that fail validation are reported and skipped. New nodes are
    /// connected to the existing corpus and, by bidirectional analysis, to
    /// each other. Items carrying an idempotency key that was already used,
    /// earlier in the store or earlier in the same batch, are returned as
    /// replayed and not created again.
    pub async fn bulk_create_nodes(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        commands: Vec<CreateNodeCommand>,
    ) -> Result<BulkCreateResult> {
        self.services
            .check_batch_size(commands.len())
            .context("validate")?;

        let mut result = BulkCreateResult::default();
        let mut items = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            let prepared = command.validate().and_then(|fields| {
                command.idempotency_key(user_id).map(|key| (fields, key))
            });
            match prepared {
                Ok(((title, content, tags), key)) => items.push(BulkItem {
                    title,
                    content,
                    tags,
                    key,
                }),
                Err(e) => result.failed.push(BulkItemFailure::new(index, &e)),
            }
        }
        let keyed = items.iter().any(|item| item.key.is_some());

        let mut plan = self.plan_bulk(user_id, &items).await?;
        let committed = self.commit_bulk(ctx, user_id, &mut plan.fresh).await;
        result.edges_created = match committed {
            // a concurrent request stored one of the keys first: plan again,
            // replaying what is stored now
            Err(e) if e.is_conflict() && keyed => {
                warn!(user_id = %user_id, error = %e, "Bulk create conflicted, replanning");
                plan = self.plan_bulk(user_id, &items).await?;
                self.commit_bulk(ctx, user_id, &mut plan.fresh).await?
            }
            other => other?,
        };

        let BulkPlan {
            slots,
            fresh,
            replayed,
        } = plan;
        result.replayed = replayed;
        result.nodes = slots
            .into_iter()
            .map(|slot| match slot {
                BulkSlot::Replayed(node) => node,
                BulkSlot::Created(position) => fresh[position].0.clone(),
            })
            .collect();
        Ok(result)
    }

    /// Resolve every item to a replayed node or a new one
    async fn plan_bulk(&self, user_id: &UserId, items: &[BulkItem]) -> Result<BulkPlan> {
        let mut plan = BulkPlan {
            slots: Vec::with_capacity(items.len()),
            fresh: Vec::new(),
            replayed: 0,
        };
        let mut first_by_key: HashMap<&IdempotencyKey, usize> = HashMap::new();

        for item in items {
            if let Some(&position) = item.key.as_ref().and_then(|key| first_by_key.get(key)) {
                plan.replayed += 1;
                plan.slots.push(BulkSlot::Created(position));
                continue;
            }
            if let Some(replayed) = self.replayed(item.key.as_ref()).await? {
                plan.replayed += 1;
                plan.slots.push(BulkSlot::Replayed(replayed.node));
                continue;
            }

            let position = plan.fresh.len();
            if let Some(key) = &item.key {
                first_by_key.insert(key, position);
            }
            let node = Node::create(
                user_id.clone(),
                item.title.clone(),
                item.content.clone(),
                item.tags.clone(),
            );
            plan.fresh.push((node, item.key.clone()));
            plan.slots.push(BulkSlot::Created(position));
        }
        Ok(plan)
    }

    /// Persist the new nodes of a plan with their edges; returns the number
    /// of edges created
    async fn commit_bulk(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        fresh: &mut [(Node, Option<IdempotencyKey>)],
    ) -> Result<usize> {
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;
        let corpus = uow.nodes().list_all(user_id).await.context("load corpus")?;

        // outgoing edges per new node, for the stored per-item results
        let mut outgoing: HashMap<NodeId, Vec<ConnectionCandidate>> = HashMap::new();
        let mut edges = Vec::new();
        for (node, _) in fresh.iter() {
            for candidate in self.services.analyzer.find_connections(node, &corpus) {
                edges.push(Edge::create(
                    user_id.clone(),
                    node.id,
                    candidate.target_id,
                    Weight::from_score(candidate.score),
                )?);
                outgoing.entry(node.id).or_default().push(candidate);
            }
        }

        let batch: Vec<Node> = fresh.iter().map(|(node, _)| node.clone()).collect();
        for matched in self.services.analyzer.analyze_bidirectional(&batch) {
            edges.push(Edge::create(
                user_id.clone(),
                matched.source_id,
                matched.target_id,
                Weight::from_score(matched.weight()),
            )?);
        }

        for (node, _) in fresh.iter_mut() {
            uow.nodes().insert(node).await.context("stage node")?;
            uow.publish_events(node.take_events());
        }
        for edge in &mut edges {
            uow.edges().insert(edge).await.context("stage edge")?;
            uow.publish_events(edge.take_events());
        }
        for (node, key) in fresh.iter() {
            if let Some(key) = key {
                let item = CreateNodeResult {
                    node: node.clone(),
                    connections: outgoing.remove(&node.id).unwrap_or_default(),
                    replayed: false,
                };
                let record = self
                    .services
                    .idempotency
                    .record(key, serde_json::to_value(&item)?)?;
                uow.stage_idempotency(record);
            }
        }

        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            created = fresh.len(),
            edges = edges.len(),
            "Bulk create committed"
        );
        Ok(edges.len())
    }

    /// Delete many nodes, each in its own transaction
    ///
    /// Unparseable, missing or conflicting ids are reported in
    /// `failed_ids`; the rest of the batch still runs.
    pub async fn bulk_delete_nodes(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_ids: Vec<String>,
    ) -> Result<BulkDeleteResult> {
        self.services
            .check_batch_size(node_ids.len())
            .context("validate")?;

        let mut result = BulkDeleteResult::default();
        for raw in node_ids {
            if ctx.is_cancelled() {
                warn!(node_id = %raw, "Request cancelled, skipping remaining deletes");
                result.failed_ids.push(raw);
                continue;
            }
            let outcome = match NodeId::parse(&raw) {
                Ok(node_id) => self.delete_node(ctx, user_id, node_id).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => result.deleted_count += 1,
                Err(e) => {
                    warn!(node_id = %raw, code = e.code(), error = %e, "Bulk delete item failed");
                    result.failed_ids.push(raw);
                }
            }
        }

        info!(
            user_id = %user_id,
            deleted = result.deleted_count,
            failed = result.failed_ids.len(),
            "Bulk delete finished"
        );
        Ok(result)
    }
}

/// One valid item of a bulk create
struct BulkItem {
    title: Title,
    content: Content,
    tags: Tags,
    key: Option<IdempotencyKey>,
}

/// Where the node of one valid item comes from
enum BulkSlot {
    Replayed(Node),
    /// Position in [`BulkPlan::fresh`]
    Created(usize),
}

/// One attempt at a bulk create
struct BulkPlan {
    slots: Vec<BulkSlot>,
    fresh: Vec<(Node, Option<IdempotencyKey>)>,
    replayed: usize,
}

async fn load_node(uow: &mut UnitOfWork, user_id: &UserId, node_id: NodeId) -> Result<Node> {
    uow.nodes()
        .get(user_id, node_id)
        .await
        .context("load node")?
        .ok_or_else(|| Error::not_found("node", node_id))
}
