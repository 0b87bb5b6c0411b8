//! Edge commands

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::context::RequestContext;
use crate::domain::edge::{Edge, EdgeReader, EdgeWriter};
use crate::domain::node::{Node, NodeReader};
use crate::domain::values::{NodeId, UserId, Weight};
use crate::error::{Error, Result, ResultExt};

use super::CommandServices;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConnectResult {
    pub created: usize,
    pub reweighted: usize,
    pub unchanged: usize,
    /// Ids that did not parse or name no node of the user
    pub failed_ids: Vec<String>,
}

/// Handles edge writes outside node creation
#[derive(Clone)]
pub struct EdgeCommandHandler {
    services: CommandServices,
}

impl EdgeCommandHandler {
    pub fn new(services: CommandServices) -> Self {
        Self { services }
    }

    /// Run bidirectional analysis over existing nodes and persist the result
    ///
    /// Missing edges are created; existing ones take the new forward score
    /// as their weight. Runs as one transaction.
    pub async fn bulk_connect(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_ids: Vec<String>,
    ) -> Result<BulkConnectResult> {
        self.services
            .check_batch_size(node_ids.len())
            .context("validate")?;

        let mut result = BulkConnectResult::default();
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let mut nodes: Vec<Node> = Vec::with_capacity(node_ids.len());
        for raw in node_ids {
            let loaded = match NodeId::parse(&raw) {
                Ok(node_id) => uow.nodes().get(user_id, node_id).await.context("load node")?,
                Err(_) => None,
            };
            match loaded {
                Some(node) if !nodes.iter().any(|n| n.id == node.id) => nodes.push(node),
                Some(_) => {}
                None => {
                    warn!(node_id = %raw, "Skipping unknown node in bulk connect");
                    result.failed_ids.push(raw);
                }
            }
        }

        for matched in self.services.analyzer.analyze_bidirectional(&nodes) {
            let weight = Weight::from_score(matched.weight());
            let existing = uow
                .edges()
                .get(user_id, matched.source_id, matched.target_id)
                .await
                .context("load edge")?;

            match existing {
                Some(mut edge) => {
                    let expected = edge.version;
                    if edge.reweight(weight) {
                        uow.edges()
                            .update_weight(&edge, expected)
                            .await
                            .context("stage reweight")?;
                        uow.publish_events(edge.take_events());
                        result.reweighted += 1;
                    } else {
                        result.unchanged += 1;
                    }
                }
                None => {
                    let mut edge =
                        Edge::create(user_id.clone(), matched.source_id, matched.target_id, weight)?;
                    uow.edges().insert(&edge).await.context("stage edge")?;
                    uow.publish_events(edge.take_events());
                    result.created += 1;
                }
            }
        }

        if result.created + result.reweighted > 0 {
            uow.commit(ctx).await.context("commit")?;
            self.services.invalidate(user_id);
        } else {
            uow.rollback();
        }

        info!(
            user_id = %user_id,
            created = result.created,
            reweighted = result.reweighted,
            failed = result.failed_ids.len(),
            "Bulk connect finished"
        );
        Ok(result)
    }

    /// Delete one edge
    pub async fn delete_edge(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        source_id: NodeId,
        target_id: NodeId,
    ) -> Result<()> {
        let mut uow = self.services.unit_of_work();
        uow.begin(ctx).context("begin")?;

        let mut edge = uow
            .edges()
            .get(user_id, source_id, target_id)
            .await
            .context("load edge")?
            .ok_or_else(|| Error::not_found("edge", format!("{}->{}", source_id, target_id)))?;

        edge.mark_deleted();
        uow.edges().delete(&edge).await.context("stage edge delete")?;
        uow.publish_events(edge.take_events());
        uow.commit(ctx).await.context("commit")?;
        self.services.invalidate(user_id);

        info!(
            user_id = %user_id,
            source_id = %source_id,
            target_id = %target_id,
            "Edge deleted"
        );
        Ok(())
    }
}
