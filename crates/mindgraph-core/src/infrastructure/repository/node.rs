//! Node repository over the Store

use async_trait::async_trait;

use crate::domain::node::{Node, NodeReader, NodeWriter};
use crate::domain::page::{Page, PageRequest};
use crate::domain::values::{NodeId, UserId, Version};
use crate::error::Result;
use crate::storage::keys;
use crate::storage::store::{Condition, IndexName, Operation, Query, Record, Store};

use super::{query_all, query_page, to_data};

fn node_record(node: &Node) -> Result<Record> {
    Ok(Record::new(keys::node_key(&node.user_id, node.id), to_data(node)?)
        .with_gsi1(keys::node_gsi1(&node.user_id, node.id))
        .with_version(node.version.value()))
}

fn user_nodes(user_id: &UserId) -> Query {
    Query::partition(keys::user_nodes_partition(user_id))
        .on_index(IndexName::Gsi1)
        .sort_prefix(keys::NODE_SK_PREFIX)
}

/// Reads nodes straight from the store
#[derive(Clone, Copy)]
pub struct StoreNodeReader<'a> {
    store: &'a dyn Store,
}

impl<'a> StoreNodeReader<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeReader for StoreNodeReader<'_> {
    async fn get(&self, user_id: &UserId, node_id: NodeId) -> Result<Option<Node>> {
        self.store
            .get(&keys::node_key(user_id, node_id))
            .await?
            .map(|record| record.decode())
            .transpose()
    }

    async fn list(&self, user_id: &UserId, page: &PageRequest) -> Result<Page<Node>> {
        query_page(self.store, user_nodes(user_id), page).await
    }

    async fn list_all(&self, user_id: &UserId) -> Result<Vec<Node>> {
        query_all(self.store, user_nodes(user_id)).await
    }
}

/// Node handle of a unit of work
pub struct NodeRepository<'a> {
    reader: StoreNodeReader<'a>,
    staged: &'a mut Vec<Operation>,
}

impl<'a> NodeRepository<'a> {
    pub fn new(store: &'a dyn Store, staged: &'a mut Vec<Operation>) -> Self {
        Self {
            reader: StoreNodeReader::new(store),
            staged,
        }
    }
}

#[async_trait]
impl NodeReader for NodeRepository<'_> {
    async fn get(&self, user_id: &UserId, node_id: NodeId) -> Result<Option<Node>> {
        self.reader.get(user_id, node_id).await
    }

    async fn list(&self, user_id: &UserId, page: &PageRequest) -> Result<Page<Node>> {
        self.reader.list(user_id, page).await
    }

    async fn list_all(&self, user_id: &UserId) -> Result<Vec<Node>> {
        self.reader.list_all(user_id).await
    }
}

#[async_trait]
impl NodeWriter for NodeRepository<'_> {
    async fn insert(&mut self, node: &Node) -> Result<()> {
        self.staged.push(Operation::Put {
            record: node_record(node)?,
            condition: Some(Condition::NotExists),
        });
        Ok(())
    }

    async fn update(&mut self, node: &Node, expected: Version) -> Result<()> {
        self.staged.push(Operation::Put {
            record: node_record(node)?,
            condition: Some(Condition::VersionEquals(expected.value())),
        });
        Ok(())
    }

    async fn delete(&mut self, node: &Node) -> Result<()> {
        self.staged.push(Operation::Delete {
            key: keys::node_key(&node.user_id, node.id),
            condition: Some(Condition::VersionEquals(node.version.value())),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::values::{Content, Tags, Title};
    use crate::storage::MemoryStore;

    fn node(user: &UserId, content: &str) -> Node {
        Node::create(
            user.clone(),
            Title::default(),
            Content::new(content).unwrap(),
            Tags::empty(),
        )
    }

    #[tokio::test]
    async fn test_insert_stages_until_transact() {
        let store = MemoryStore::new();
        let user = UserId::new("alice").unwrap();
        let node = node(&user, "ports and adapters");
        let mut staged = Vec::new();

        let mut repo = NodeRepository::new(&store, &mut staged);
        repo.insert(&node).await.unwrap();
        assert!(repo.get(&user, node.id).await.unwrap().is_none());

        store.transact(staged).await.unwrap();
        let loaded = StoreNodeReader::new(&store).get(&user, node.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, node.id);
        assert_eq!(loaded.keywords, node.keywords);
    }

    #[tokio::test]
    async fn test_list_pages_through_user_nodes_only() {
        let store = MemoryStore::new();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();
        let mut staged = Vec::new();
        {
            let mut repo = NodeRepository::new(&store, &mut staged);
            for i in 0..5 {
                repo.insert(&node(&alice, &format!("note number {}", i))).await.unwrap();
            }
            repo.insert(&node(&bob, "someone else")).await.unwrap();
        }
        store.transact(staged).await.unwrap();

        let reader = StoreNodeReader::new(&store);
        let first = reader.list(&alice, &PageRequest::first(3)).await.unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.has_more);

        let cursor = first.next_cursor.clone().unwrap();
        let second = reader.list(&alice, &PageRequest::after(3, cursor)).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_more);
        assert!(second.items.iter().all(|n| n.user_id == alice));

        assert_eq!(reader.list_all(&alice).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let user = UserId::new("alice").unwrap();
        let mut node = node(&user, "first draft");

        let mut staged = Vec::new();
        NodeRepository::new(&store, &mut staged).insert(&node).await.unwrap();
        store.transact(staged).await.unwrap();

        node.apply(crate::domain::node::NodeChanges {
            content: Some(Content::new("second draft").unwrap()),
            ..Default::default()
        })
        .unwrap();

        let mut staged = Vec::new();
        NodeRepository::new(&store, &mut staged)
            .update(&node, Version::INITIAL.next())
            .await
            .unwrap();
        assert!(store.transact(staged).await.unwrap_err().is_conflict());

        let mut staged = Vec::new();
        NodeRepository::new(&store, &mut staged)
            .update(&node, Version::INITIAL)
            .await
            .unwrap();
        store.transact(staged).await.unwrap();
    }
}
