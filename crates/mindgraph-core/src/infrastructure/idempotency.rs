//! Idempotency store
//!
//! Remembers the result of a create keyed by (user, operation, request
//! hash) for a bounded time. Command handlers fold the record into the
//! create's own transaction through [`IdempotencyStore::record`], so a
//! record exists exactly when the create committed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::IdempotencyConfig;
use crate::domain::values::UserId;
use crate::error::Result;
use crate::storage::keys;
use crate::storage::store::{Condition, Key, Operation, Record, ScanFilter, Store};

/// SHA-256 hex of the canonical JSON form of a command
///
/// `serde_json` maps keep their keys sorted, so equal commands hash equally
/// whatever the field order of their source.
pub fn request_hash<T: Serialize>(command: &T) -> Result<String> {
    let canonical = serde_json::to_string(&serde_json::to_value(command)?)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Identity of one logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub user_id: UserId,
    pub operation: String,
    pub request_hash: String,
}

impl IdempotencyKey {
    pub fn new(
        user_id: &UserId,
        operation: impl Into<String>,
        request_hash: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.clone(),
            operation: operation.into(),
            request_hash: request_hash.into(),
        }
    }

    /// Key for `command`, hashed canonically
    pub fn for_command<T: Serialize>(
        user_id: &UserId,
        operation: impl Into<String>,
        command: &T,
    ) -> Result<Self> {
        Ok(Self::new(user_id, operation, request_hash(command)?))
    }

    pub fn store_key(&self) -> Key {
        keys::idempotency_key(&self.user_id, &self.operation, &self.request_hash)
    }
}

/// Stored body of an idempotency item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub result: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Previously computed results of non-idempotent requests
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// The stored result, if the request was seen and has not expired
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<Value>>;

    /// Store a result outside any transaction; the first result wins
    async fn store(&self, key: &IdempotencyKey, result: Value) -> Result<()>;

    /// The put operation that stores `result` as part of a transaction
    fn record(&self, key: &IdempotencyKey, result: Value) -> Result<Operation>;

    /// Delete expired records; returns how many were removed
    async fn purge_expired(&self) -> Result<u64>;
}

/// Idempotency records kept in the main store
pub struct StoreIdempotencyStore {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl StoreIdempotencyStore {
    pub fn new(store: Arc<dyn Store>, config: &IdempotencyConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn put_operation(&self, key: &IdempotencyKey, result: Value) -> Result<Operation> {
        let now = Utc::now();
        let body = IdempotencyRecord {
            key: key.clone(),
            result,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let record =
            Record::new(key.store_key(), serde_json::to_value(&body)?).with_expiry(body.expires_at);
        Ok(Operation::Put {
            record,
            condition: Some(Condition::NotExists),
        })
    }
}

#[async_trait]
impl IdempotencyStore for StoreIdempotencyStore {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<Value>> {
        let Some(record) = self.store.get(&key.store_key()).await? else {
            return Ok(None);
        };
        let body: IdempotencyRecord = record.decode()?;
        debug!(
            user_id = %key.user_id,
            operation = %key.operation,
            "Idempotency record found"
        );
        Ok(Some(body.result))
    }

    async fn store(&self, key: &IdempotencyKey, result: Value) -> Result<()> {
        match self.store.transact(vec![self.put_operation(key, result)?]).await {
            Err(e) if e.is_conflict() => {
                debug!(operation = %key.operation, "Idempotency record already stored");
                Ok(())
            }
            other => other,
        }
    }

    fn record(&self, key: &IdempotencyKey, result: Value) -> Result<Operation> {
        self.put_operation(key, result)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let filter = ScanFilter {
            pk_prefix: Some(keys::IDEMPOTENCY_PK_PREFIX.to_string()),
            expired_before: Some(Utc::now()),
            ..Default::default()
        };
        let expired = self.store.scan(&filter, None).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let count = expired.len() as u64;
        let deletes = expired
            .into_iter()
            .map(|record| Operation::Delete {
                key: record.key,
                condition: None,
            })
            .collect();
        self.store.transact(deletes).await?;

        info!(removed = count, "Purged expired idempotency records");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn idempotency(ttl_hours: i64) -> (Arc<MemoryStore>, StoreIdempotencyStore) {
        let store = Arc::new(MemoryStore::new());
        let idem = StoreIdempotencyStore::new(store.clone(), &IdempotencyConfig { ttl_hours });
        (store, idem)
    }

    #[test]
    fn test_request_hash_is_canonical() {
        let a = request_hash(&json!({"content": "x", "tags": ["a"], "title": "t"})).unwrap();
        let b = request_hash(&json!({"title": "t", "tags": ["a"], "content": "x"})).unwrap();
        let c = request_hash(&json!({"title": "t", "tags": ["a"], "content": "y"})).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_first_result_wins() {
        let (_, idem) = idempotency(24);
        let key = IdempotencyKey::new(&UserId::new("alice").unwrap(), "create_node", "h1");

        assert!(idem.get(&key).await.unwrap().is_none());
        idem.store(&key, json!({"node_id": "first"})).await.unwrap();
        idem.store(&key, json!({"node_id": "second"})).await.unwrap();

        assert_eq!(idem.get(&key).await.unwrap(), Some(json!({"node_id": "first"})));
    }

    #[tokio::test]
    async fn test_records_expire_and_purge() {
        let (store, idem) = idempotency(24);
        let user = UserId::new("alice").unwrap();
        let key = IdempotencyKey::new(&user, "create_node", "h1");

        let stale = Record::new(key.store_key(), json!({}))
            .with_expiry(Utc::now() - Duration::hours(1));
        store.put(stale, None).await.unwrap();
        idem.store(&IdempotencyKey::new(&user, "create_node", "h2"), json!(2))
            .await
            .unwrap();

        assert!(idem.get(&key).await.unwrap().is_none());
        assert_eq!(idem.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_operation_uses_not_exists() {
        let (_, idem) = idempotency(24);
        let key = IdempotencyKey::new(&UserId::new("alice").unwrap(), "create_node", "h1");

        match idem.record(&key, json!(1)).unwrap() {
            Operation::Put { record, condition } => {
                assert_eq!(condition, Some(Condition::NotExists));
                assert_eq!(record.key.pk, "IDEMPOTENCY#alice#create_node");
                let expires = record.expires_at.unwrap();
                assert!(expires > Utc::now() + Duration::hours(23));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }
}
