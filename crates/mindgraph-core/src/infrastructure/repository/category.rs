//! Category and membership repository over the Store

use async_trait::async_trait;

use crate::domain::category::{Category, CategoryMembership, CategoryReader, CategoryWriter};
use crate::domain::page::{Page, PageRequest};
use crate::domain::values::{CategoryId, NodeId, UserId, Version};
use crate::error::Result;
use crate::storage::keys;
use crate::storage::store::{Condition, IndexName, Operation, Query, Record, Store};

use super::{query_all, query_page, to_data};

fn category_record(category: &Category) -> Result<Record> {
    Ok(
        Record::new(keys::category_key(&category.user_id, category.id), to_data(category)?)
            .with_gsi1(keys::category_gsi1(&category.user_id, category.id))
            .with_version(category.version.value()),
    )
}

fn membership_record(membership: &CategoryMembership) -> Result<Record> {
    let (user, category, node) = (
        &membership.user_id,
        membership.category_id,
        membership.node_id,
    );
    Ok(
        Record::new(keys::membership_key(user, category, node), to_data(membership)?)
            .with_gsi2(keys::membership_gsi2(user, category, node)),
    )
}

fn members_query(user_id: &UserId, category_id: CategoryId) -> Query {
    Query::partition(keys::category_pk(user_id, category_id)).sort_prefix(keys::NODE_SK_PREFIX)
}

fn memberships_of_query(user_id: &UserId, node_id: NodeId) -> Query {
    Query::partition(keys::node_categories_partition(user_id, node_id))
        .on_index(IndexName::Gsi2)
        .sort_prefix(keys::CATEGORY_SK_PREFIX)
}

/// Reads categories and memberships straight from the store
#[derive(Clone, Copy)]
pub struct StoreCategoryReader<'a> {
    store: &'a dyn Store,
}

impl<'a> StoreCategoryReader<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CategoryReader for StoreCategoryReader<'_> {
    async fn get(&self, user_id: &UserId, category_id: CategoryId) -> Result<Option<Category>> {
        self.store
            .get(&keys::category_key(user_id, category_id))
            .await?
            .map(|record| record.decode())
            .transpose()
    }

    async fn list(&self, user_id: &UserId, page: &PageRequest) -> Result<Page<Category>> {
        let query = Query::partition(keys::user_categories_partition(user_id))
            .on_index(IndexName::Gsi1)
            .sort_prefix(keys::CATEGORY_SK_PREFIX);
        query_page(self.store, query, page).await
    }

    async fn members(
        &self,
        user_id: &UserId,
        category_id: CategoryId,
    ) -> Result<Vec<CategoryMembership>> {
        query_all(self.store, members_query(user_id, category_id)).await
    }

    async fn memberships_of(
        &self,
        user_id: &UserId,
        node_id: NodeId,
    ) -> Result<Vec<CategoryMembership>> {
        query_all(self.store, memberships_of_query(user_id, node_id)).await
    }
}

/// Category handle of a unit of work
pub struct CategoryRepository<'a> {
    reader: StoreCategoryReader<'a>,
    staged: &'a mut Vec<Operation>,
}

impl<'a> CategoryRepository<'a> {
    pub fn new(store: &'a dyn Store, staged: &'a mut Vec<Operation>) -> Self {
        Self {
            reader: StoreCategoryReader::new(store),
            staged,
        }
    }
}

#[async_trait]
impl CategoryReader for CategoryRepository<'_> {
    async fn get(&self, user_id: &UserId, category_id: CategoryId) -> Result<Option<Category>> {
        self.reader.get(user_id, category_id).await
    }

    async fn list(&self, user_id: &UserId, page: &PageRequest) -> Result<Page<Category>> {
        self.reader.list(user_id, page).await
    }

    async fn members(
        &self,
        user_id: &UserId,
        category_id: CategoryId,
    ) -> Result<Vec<CategoryMembership>> {
        self.reader.members(user_id, category_id).await
    }

    async fn memberships_of(
        &self,
        user_id: &UserId,
        node_id: NodeId,
    ) -> Result<Vec<CategoryMembership>> {
        self.reader.memberships_of(user_id, node_id).await
    }
}

#[async_trait]
impl CategoryWriter for CategoryRepository<'_> {
    async fn insert(&mut self, category: &Category) -> Result<()> {
        self.staged.push(Operation::Put {
            record: category_record(category)?,
            condition: Some(Condition::NotExists),
        });
        Ok(())
    }

    async fn update(&mut self, category: &Category, expected: Version) -> Result<()> {
        self.staged.push(Operation::Put {
            record: category_record(category)?,
            condition: Some(Condition::VersionEquals(expected.value())),
        });
        Ok(())
    }

    async fn delete(&mut self, category: &Category) -> Result<()> {
        self.staged.push(Operation::Delete {
            key: keys::category_key(&category.user_id, category.id),
            condition: Some(Condition::VersionEquals(category.version.value())),
        });
        Ok(())
    }

    async fn add_member(&mut self, membership: &CategoryMembership) -> Result<()> {
        let user = &membership.user_id;
        self.staged.push(Operation::ConditionCheck {
            key: keys::node_key(user, membership.node_id),
            condition: Condition::Exists,
        });
        self.staged.push(Operation::ConditionCheck {
            key: keys::category_key(user, membership.category_id),
            condition: Condition::Exists,
        });
        self.staged.push(Operation::Put {
            record: membership_record(membership)?,
            condition: Some(Condition::NotExists),
        });
        Ok(())
    }

    async fn remove_member(&mut self, membership: &CategoryMembership) -> Result<()> {
        self.staged.push(Operation::Delete {
            key: keys::membership_key(
                &membership.user_id,
                membership.category_id,
                membership.node_id,
            ),
            condition: None,
        });
        Ok(())
    }

    async fn expect_no_members(&mut self, user_id: &UserId, category_id: CategoryId) -> Result<()> {
        self.staged.push(Operation::ExpectEmpty {
            query: members_query(user_id, category_id),
        });
        Ok(())
    }

    async fn expect_no_memberships_of(&mut self, user_id: &UserId, node_id: NodeId) -> Result<()> {
        self.staged.push(Operation::ExpectEmpty {
            query: memberships_of_query(user_id, node_id),
        });
        Ok(())
    }
}
