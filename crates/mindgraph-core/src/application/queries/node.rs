//! Node and graph queries

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::context::RequestContext;
use crate::config::LimitsConfig;
use crate::domain::category::CategoryReader;
use crate::domain::edge::{Edge, EdgeReader};
use crate::domain::node::{Node, NodeReader};
use crate::domain::page::{Page, PageRequest};
use crate::domain::values::{CategoryId, NodeId, UserId};
use crate::error::{Error, Result};
use crate::infrastructure::cache::{CacheKey, QueryCache};
use crate::infrastructure::repository::{StoreCategoryReader, StoreEdgeReader, StoreNodeReader};
use crate::storage::store::Store;

use super::{clamp_page, page_params};

/// Number of keywords reported by [`GraphStats::top_keywords`]
pub const TOP_KEYWORDS: usize = 10;

/// A node with its immediate neighbourhood
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    pub node: Node,
    pub outgoing: Vec<Edge>,
    pub incoming: Vec<Edge>,
    pub category_ids: Vec<CategoryId>,
}

/// The whole graph of one user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: usize,
}

/// Shape of a user's graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub archived_count: usize,
    /// Mean of in-degree plus out-degree
    pub average_degree: f64,
    /// `edges / (nodes * (nodes - 1))` for a directed graph
    pub density: f64,
    /// Nodes without any edge
    pub isolated_nodes: usize,
    pub top_keywords: Vec<KeywordCount>,
}

impl GraphStats {
    pub fn compute(nodes: &[Node], edges: &[Edge]) -> Self {
        let node_count = nodes.len();
        let edge_count = edges.len();
        if node_count == 0 {
            return Self::default();
        }

        let connected: HashSet<NodeId> = edges
            .iter()
            .flat_map(|edge| [edge.source_id, edge.target_id])
            .collect();
        let isolated_nodes = nodes.iter().filter(|n| !connected.contains(&n.id)).count();

        let density = if node_count > 1 {
            edge_count as f64 / (node_count * (node_count - 1)) as f64
        } else {
            0.0
        };

        let mut frequencies: BTreeMap<&str, usize> = BTreeMap::new();
        for keyword in nodes.iter().flat_map(|n| n.keywords.iter()) {
            *frequencies.entry(keyword.as_str()).or_insert(0) += 1;
        }
        let mut top_keywords: Vec<KeywordCount> = frequencies
            .into_iter()
            .map(|(keyword, count)| KeywordCount {
                keyword: keyword.to_string(),
                count,
            })
            .collect();
        // alphabetical order from the map breaks ties
        top_keywords.sort_by(|a, b| b.count.cmp(&a.count));
        top_keywords.truncate(TOP_KEYWORDS);

        Self {
            node_count,
            edge_count,
            archived_count: nodes.iter().filter(|n| n.archived).count(),
            average_degree: 2.0 * edge_count as f64 / node_count as f64,
            density,
            isolated_nodes,
            top_keywords,
        }
    }
}

/// Cached reads of nodes and graphs
#[derive(Clone)]
pub struct NodeQueryService {
    store: Arc<dyn Store>,
    cache: Arc<QueryCache>,
    limits: LimitsConfig,
}

impl NodeQueryService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<QueryCache>, limits: &LimitsConfig) -> Self {
        Self {
            store,
            cache,
            limits: limits.clone(),
        }
    }

    /// A node with its edges and category ids
    pub async fn get_node(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        node_id: NodeId,
    ) -> Result<NodeDetail> {
        let key = CacheKey::new("get_node", user_id, node_id.to_string());
        let store = &*self.store;
        ctx.run(
            "get_node",
            self.cache.get_or_load(key, || async move {
                let node = StoreNodeReader::new(store)
                    .get(user_id, node_id)
                    .await?
                    .ok_or_else(|| Error::not_found("node", node_id))?;
                let edges = StoreEdgeReader::new(store);
                let outgoing = edges.outgoing(user_id, node_id).await?;
                let incoming = edges.incoming(user_id, node_id).await?;
                let category_ids = StoreCategoryReader::new(store)
                    .memberships_of(user_id, node_id)
                    .await?
                    .into_iter()
                    .map(|m| m.category_id)
                    .collect();
                Ok(NodeDetail {
                    node,
                    outgoing,
                    incoming,
                    category_ids,
                })
            }),
        )
        .await
    }

    /// One page of the user's nodes, in id order
    pub async fn list_nodes(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Node>> {
        let page = clamp_page(&self.limits, page);
        let key = CacheKey::new("list_nodes", user_id, page_params(&page));
        let store = &*self.store;
        let page = &page;
        ctx.run(
            "list_nodes",
            self.cache.get_or_load(key, || async move {
                StoreNodeReader::new(store).list(user_id, page).await
            }),
        )
        .await
    }

    /// Every node and edge of the user
    pub async fn get_graph(&self, ctx: &RequestContext, user_id: &UserId) -> Result<GraphView> {
        let key = CacheKey::new("get_graph", user_id, "");
        ctx.run(
            "get_graph",
            self.cache
                .get_or_load(key, || self.load_graph(user_id)),
        )
        .await
    }

    pub async fn graph_stats(&self, ctx: &RequestContext, user_id: &UserId) -> Result<GraphStats> {
        let key = CacheKey::new("graph_stats", user_id, "");
        ctx.run(
            "graph_stats",
            self.cache.get_or_load(key, || async {
                let graph = self.load_graph(user_id).await?;
                Ok(GraphStats::compute(&graph.nodes, &graph.edges))
            }),
        )
        .await
    }

    async fn load_graph(&self, user_id: &UserId) -> Result<GraphView> {
        let nodes = StoreNodeReader::new(&*self.store).list_all(user_id).await?;
        let edges = StoreEdgeReader::new(&*self.store).list_all(user_id).await?;
        Ok(GraphView { nodes, edges })
    }
}
