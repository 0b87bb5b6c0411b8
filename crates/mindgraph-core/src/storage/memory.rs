//! In-memory Store adapter

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

use super::store::{Key, Operation, Query, QueryPage, Record, ScanFilter, Store, merge_patch};

/// Store backed by a sorted map behind an async lock
///
/// Transactions take the write lock, stage every operation into an overlay
/// and touch the map only after all conditions passed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<Key, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items, expired ones included
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Every item, expired ones included, in key order
    pub async fn dump(&self) -> Vec<Record> {
        self.items.read().await.values().cloned().collect()
    }
}

/// Staged view of the map during a transaction
struct Overlay<'a> {
    base: &'a BTreeMap<Key, Record>,
    staged: BTreeMap<Key, Option<Record>>,
    now: DateTime<Utc>,
}

impl<'a> Overlay<'a> {
    fn new(base: &'a BTreeMap<Key, Record>, now: DateTime<Utc>) -> Self {
        Self {
            base,
            staged: BTreeMap::new(),
            now,
        }
    }

    fn live(&self, key: &Key) -> Option<&Record> {
        let record = match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(key),
        };
        record.filter(|r| !r.is_expired_at(self.now))
    }

    fn apply(&mut self, operation: Operation) -> Result<()> {
        match operation {
            Operation::Put { record, condition } => {
                if let Some(condition) = condition {
                    condition.check(&record.key, self.live(&record.key))?;
                }
                self.staged.insert(record.key.clone(), Some(record));
            }
            Operation::Update {
                key,
                patch,
                condition,
            } => {
                let current = self.live(&key).cloned();
                if let Some(condition) = condition {
                    condition.check(&key, current.as_ref())?;
                }
                let Some(mut record) = current else {
                    return Err(Error::conflict("record", &key, "cannot update a missing item"));
                };
                merge_patch(&mut record.data, &patch);
                record.version += 1;
                self.staged.insert(key, Some(record));
            }
            Operation::Delete { key, condition } => {
                if let Some(condition) = condition {
                    condition.check(&key, self.live(&key))?;
                }
                self.staged.insert(key, None);
            }
            Operation::ConditionCheck { key, condition } => {
                condition.check(&key, self.live(&key))?;
            }
            Operation::ExpectEmpty { query } => {
                let remaining = self.selected(&query);
                if remaining > 0 {
                    return Err(Error::conflict(
                        "partition",
                        &query.partition,
                        format!("{} items remain", remaining),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Number of live items `query` selects in the staged view
    fn selected(&self, query: &Query) -> usize {
        let staged = self.staged.keys();
        let unstaged = self.base.keys().filter(|key| !self.staged.contains_key(key));
        staged
            .chain(unstaged)
            .filter_map(|key| self.live(key))
            .filter(|record| record.index_key(query.index).is_some_and(|k| query.selects(k)))
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Record>> {
        let now = Utc::now();
        let items = self.items.read().await;
        Ok(items.get(key).filter(|r| !r.is_expired_at(now)).cloned())
    }

    async fn query(&self, query: &Query) -> Result<QueryPage> {
        let now = Utc::now();
        let items = self.items.read().await;

        let mut rows: Vec<(String, Record)> = items
            .values()
            .filter(|r| !r.is_expired_at(now))
            .filter_map(|r| {
                let key = r.index_key(query.index)?;
                query.selects(key).then(|| (key.sk.clone(), r.clone()))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(QueryPage::from_sorted(rows, query.limit))
    }

    async fn scan(&self, filter: &ScanFilter, limit: Option<usize>) -> Result<Vec<Record>> {
        let now = Utc::now();
        let items = self.items.read().await;

        Ok(items
            .values()
            .filter(|r| filter.matches(r, now))
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| filter.project(r.clone()))
            .collect())
    }

    async fn transact(&self, operations: Vec<Operation>) -> Result<()> {
        let count = operations.len();
        let mut items = self.items.write().await;

        let staged = {
            let mut overlay = Overlay::new(&items, Utc::now());
            for operation in operations {
                overlay.apply(operation)?;
            }
            overlay.staged
        };

        for (key, record) in staged {
            match record {
                Some(record) => {
                    items.insert(key, record);
                }
                None => {
                    items.remove(&key);
                }
            }
        }

        debug!(operations = count, "Committed memory transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::{Condition, IndexName};
    use serde_json::json;

    fn item(pk: &str, sk: &str) -> Record {
        Record::new(Key::new(pk, sk), json!({"name": sk}))
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        let key = Key::new("P", "S");

        store.put(item("P", "S"), None).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_some());

        store.delete(&key, Some(Condition::Exists)).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.delete(&key, Some(Condition::Exists)).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_failed_condition_aborts_whole_transaction() {
        let store = MemoryStore::new();
        store.put(item("P", "A"), None).await.unwrap();

        let err = store
            .transact(vec![
                Operation::Put {
                    record: item("P", "B"),
                    condition: Some(Condition::NotExists),
                },
                Operation::Delete {
                    key: Key::new("P", "A"),
                    condition: None,
                },
                Operation::ConditionCheck {
                    key: Key::new("P", "missing"),
                    condition: Condition::Exists,
                },
            ])
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(store.get(&Key::new("P", "A")).await.unwrap().is_some());
        assert!(store.get(&Key::new("P", "B")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expect_empty_sees_staged_deletes() {
        let store = MemoryStore::new();
        let edge = |sk: &str| {
            item("USER#a#NODE#1", sk)
                .with_gsi2(Key::new("USER#a#EDGE#TARGET#9", format!("SOURCE#{}", sk)))
        };
        store.put(edge("e1"), None).await.unwrap();
        store.put(edge("e2"), None).await.unwrap();
        let incoming = Query::partition("USER#a#EDGE#TARGET#9").on_index(IndexName::Gsi2);

        // one of two items deleted: the check fails and nothing applies
        let err = store
            .transact(vec![
                Operation::Delete {
                    key: Key::new("USER#a#NODE#1", "e1"),
                    condition: None,
                },
                Operation::ExpectEmpty {
                    query: incoming.clone(),
                },
            ])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.len().await, 2);

        store
            .transact(vec![
                Operation::Delete {
                    key: Key::new("USER#a#NODE#1", "e1"),
                    condition: None,
                },
                Operation::Delete {
                    key: Key::new("USER#a#NODE#1", "e2"),
                    condition: None,
                },
                Operation::ExpectEmpty { query: incoming },
            ])
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_conditions_see_earlier_operations() {
        let store = MemoryStore::new();
        store
            .transact(vec![
                Operation::Put {
                    record: item("P", "A"),
                    condition: Some(Condition::NotExists),
                },
                Operation::ConditionCheck {
                    key: Key::new("P", "A"),
                    condition: Condition::Exists,
                },
            ])
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_bumps_version() {
        let store = MemoryStore::new();
        let key = Key::new("P", "S");
        store
            .put(Record::new(key.clone(), json!({"weight": 0.2, "keep": true})), None)
            .await
            .unwrap();

        let patch = json!({"weight": 0.9}).as_object().cloned().unwrap();
        store
            .update(&key, patch.clone(), Some(Condition::VersionEquals(1)))
            .await
            .unwrap();

        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.data, json!({"weight": 0.9, "keep": true}));

        let err = store
            .update(&key, patch, Some(Condition::VersionEquals(1)))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_expired_items_read_as_absent() {
        let store = MemoryStore::new();
        let past = Utc::now() - chrono::Duration::seconds(5);
        store
            .put(item("P", "S").with_expiry(past), None)
            .await
            .unwrap();

        assert!(store.get(&Key::new("P", "S")).await.unwrap().is_none());
        store
            .put(item("P", "S"), Some(Condition::NotExists))
            .await
            .unwrap();
        assert!(store.get(&Key::new("P", "S")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_query_index_with_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let record = item(&format!("USER#a#NODE#{}", i), "METADATA#v0")
                .with_gsi1(Key::new("USER#a", format!("NODE#{}", i)));
            store.put(record, None).await.unwrap();
        }
        store
            .put(item("USER#b#NODE#9", "METADATA#v0").with_gsi1(Key::new("USER#b", "NODE#9")), None)
            .await
            .unwrap();

        let first = store
            .query(&Query::partition("USER#a").on_index(IndexName::Gsi1).limit(3))
            .await
            .unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.last_sort_key.as_deref(), Some("NODE#2"));

        let rest = store
            .query(
                &Query::partition("USER#a")
                    .on_index(IndexName::Gsi1)
                    .limit(3)
                    .start_after(first.last_sort_key),
            )
            .await
            .unwrap();
        assert_eq!(rest.records.len(), 2);
        assert!(rest.last_sort_key.is_none());
    }

    #[tokio::test]
    async fn test_scan_expired() {
        let store = MemoryStore::new();
        let past = Utc::now() - chrono::Duration::hours(1);
        store.put(item("IDEMPOTENCY#a#op", "REQUEST#1").with_expiry(past), None).await.unwrap();
        store.put(item("IDEMPOTENCY#a#op", "REQUEST#2"), None).await.unwrap();

        let expired = store.scan(&ScanFilter::expired_before(Utc::now()), None).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key.sk, "REQUEST#1");

        let live = store.scan(&ScanFilter::pk_prefix("IDEMPOTENCY#"), Some(10)).await.unwrap();
        assert_eq!(live.len(), 1);
    }
}
