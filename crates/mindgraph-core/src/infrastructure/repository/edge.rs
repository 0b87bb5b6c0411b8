//! Edge repository over the Store
//!
//! Edges live in the source node's partition. GSI1 lists all edges of a
//! user; GSI2 finds the edges pointing at a node.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::edge::{Edge, EdgeReader, EdgeWriter};
use crate::domain::values::{NodeId, UserId, Version};
use crate::error::Result;
use crate::storage::keys;
use crate::storage::store::{Condition, IndexName, Operation, Query, Record, Store};

use super::{query_all, to_data};

fn edge_record(edge: &Edge) -> Result<Record> {
    let (user, source, target) = (&edge.user_id, edge.source_id, edge.target_id);
    Ok(Record::new(keys::edge_key(user, source, target), to_data(edge)?)
        .with_gsi1(keys::edge_gsi1(user, source, target))
        .with_gsi2(keys::edge_gsi2(user, source, target))
        .with_version(edge.version.value()))
}

fn outgoing_query(user_id: &UserId, source_id: NodeId) -> Query {
    Query::partition(keys::node_pk(user_id, source_id)).sort_prefix(keys::EDGE_SK_PREFIX)
}

fn incoming_query(user_id: &UserId, target_id: NodeId) -> Query {
    Query::partition(keys::incoming_edges_partition(user_id, target_id))
        .on_index(IndexName::Gsi2)
        .sort_prefix(keys::SOURCE_SK_PREFIX)
}

/// Reads edges straight from the store
#[derive(Clone, Copy)]
pub struct StoreEdgeReader<'a> {
    store: &'a dyn Store,
}

impl<'a> StoreEdgeReader<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EdgeReader for StoreEdgeReader<'_> {
    async fn get(
        &self,
        user_id: &UserId,
        source_id: NodeId,
        target_id: NodeId,
    ) -> Result<Option<Edge>> {
        self.store
            .get(&keys::edge_key(user_id, source_id, target_id))
            .await?
            .map(|record| record.decode())
            .transpose()
    }

    async fn outgoing(&self, user_id: &UserId, source_id: NodeId) -> Result<Vec<Edge>> {
        query_all(self.store, outgoing_query(user_id, source_id)).await
    }

    async fn incoming(&self, user_id: &UserId, target_id: NodeId) -> Result<Vec<Edge>> {
        query_all(self.store, incoming_query(user_id, target_id)).await
    }

    async fn list_all(&self, user_id: &UserId) -> Result<Vec<Edge>> {
        let query =
            Query::partition(keys::user_edges_partition(user_id)).on_index(IndexName::Gsi1);
        query_all(self.store, query).await
    }
}

/// Edge handle of a unit of work
pub struct EdgeRepository<'a> {
    reader: StoreEdgeReader<'a>,
    staged: &'a mut Vec<Operation>,
}

impl<'a> EdgeRepository<'a> {
    pub fn new(store: &'a dyn Store, staged: &'a mut Vec<Operation>) -> Self {
        Self {
            reader: StoreEdgeReader::new(store),
            staged,
        }
    }
}

#[async_trait]
impl EdgeReader for EdgeRepository<'_> {
    async fn get(
        &self,
        user_id: &UserId,
        source_id: NodeId,
        target_id: NodeId,
    ) -> Result<Option<Edge>> {
        self.reader.get(user_id, source_id, target_id).await
    }

    async fn outgoing(&self, user_id: &UserId, source_id: NodeId) -> Result<Vec<Edge>> {
        self.reader.outgoing(user_id, source_id).await
    }

    async fn incoming(&self, user_id: &UserId, target_id: NodeId) -> Result<Vec<Edge>> {
        self.reader.incoming(user_id, target_id).await
    }

    async fn list_all(&self, user_id: &UserId) -> Result<Vec<Edge>> {
        self.reader.list_all(user_id).await
    }
}

#[async_trait]
impl EdgeWriter for EdgeRepository<'_> {
    async fn insert(&mut self, edge: &Edge) -> Result<()> {
        for endpoint in [edge.source_id, edge.target_id] {
            self.staged.push(Operation::ConditionCheck {
                key: keys::node_key(&edge.user_id, endpoint),
                condition: Condition::Exists,
            });
        }
        self.staged.push(Operation::Put {
            record: edge_record(edge)?,
            condition: Some(Condition::NotExists),
        });
        Ok(())
    }

    async fn update_weight(&mut self, edge: &Edge, expected: Version) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("weight".to_string(), Value::from(edge.weight.value()));
        patch.insert("version".to_string(), Value::from(edge.version.value()));
        patch.insert("updated_at".to_string(), to_data(&edge.updated_at)?);

        self.staged.push(Operation::Update {
            key: keys::edge_key(&edge.user_id, edge.source_id, edge.target_id),
            patch,
            condition: Some(Condition::VersionEquals(expected.value())),
        });
        Ok(())
    }

    async fn delete(&mut self, edge: &Edge) -> Result<()> {
        self.staged.push(Operation::Delete {
            key: keys::edge_key(&edge.user_id, edge.source_id, edge.target_id),
            condition: Some(Condition::VersionEquals(edge.version.value())),
        });
        Ok(())
    }

    async fn expect_detached(&mut self, user_id: &UserId, node_id: NodeId) -> Result<()> {
        self.staged.push(Operation::ExpectEmpty {
            query: outgoing_query(user_id, node_id),
        });
        self.staged.push(Operation::ExpectEmpty {
            query: incoming_query(user_id, node_id),
        });
        Ok(())
    }
}
