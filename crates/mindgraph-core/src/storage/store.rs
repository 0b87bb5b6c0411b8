//! Store port
//!
//! A single-table document store: every item has a partition key and a sort
//! key, up to two secondary index keys, a version counter, a JSON body and
//! an optional expiry. Adapters provide `get`, `query`, `scan` and
//! `transact`; the single-item writes are one-operation transactions.
//!
//! Operations in one transaction apply in order, and each condition sees
//! the effect of the operations before it. Expired items behave as absent
//! everywhere except [`ScanFilter::expired_before`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Primary or secondary key of an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.pk, self.sk)
    }
}

/// Secondary indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
    Gsi1,
    Gsi2,
}

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gsi1 => "GSI1",
            Self::Gsi2 => "GSI2",
        }
    }
}

/// A stored item
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub gsi1: Option<Key>,
    pub gsi2: Option<Key>,
    pub version: u64,
    pub data: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(key: Key, data: Value) -> Self {
        Self {
            key,
            gsi1: None,
            gsi2: None,
            version: 1,
            data,
            expires_at: None,
        }
    }

    pub fn with_gsi1(mut self, key: Key) -> Self {
        self.gsi1 = Some(key);
        self
    }

    pub fn with_gsi2(mut self, key: Key) -> Self {
        self.gsi2 = Some(key);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The key this record has on `index`, or its primary key for `None`
    pub fn index_key(&self, index: Option<IndexName>) -> Option<&Key> {
        match index {
            None => Some(&self.key),
            Some(IndexName::Gsi1) => self.gsi1.as_ref(),
            Some(IndexName::Gsi2) => self.gsi2.as_ref(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Deserialize the JSON body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Per-item precondition of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Exists,
    NotExists,
    VersionEquals(u64),
}

impl Condition {
    /// Evaluate against the live item (`None` when absent or expired)
    pub fn check(&self, key: &Key, current: Option<&Record>) -> Result<()> {
        let failure = match (self, current) {
            (Self::Exists, Some(_)) | (Self::NotExists, None) => return Ok(()),
            (Self::VersionEquals(expected), Some(record)) if record.version == *expected => {
                return Ok(());
            }
            (Self::Exists, None) => "item does not exist".to_string(),
            (Self::NotExists, Some(_)) => "item already exists".to_string(),
            (Self::VersionEquals(expected), Some(record)) => {
                format!("expected version {}, found {}", expected, record.version)
            }
            (Self::VersionEquals(expected), None) => {
                format!("expected version {}, item does not exist", expected)
            }
        };
        Err(Error::conflict("record", key, failure))
    }
}

/// One step of a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put {
        record: Record,
        condition: Option<Condition>,
    },
    /// Shallow-merge `patch` into the body and bump the version; the item
    /// must exist
    Update {
        key: Key,
        patch: Map<String, Value>,
        condition: Option<Condition>,
    },
    Delete {
        key: Key,
        condition: Option<Condition>,
    },
    ConditionCheck {
        key: Key,
        condition: Condition,
    },
    /// Fail with `Conflict` unless `query` selects no live item once the
    /// earlier operations are applied
    ExpectEmpty { query: Query },
}

impl Operation {
    /// Key or partition the operation addresses, for logs and errors
    pub fn target(&self) -> String {
        match self {
            Self::Put { record, .. } => record.key.to_string(),
            Self::Update { key, .. } | Self::Delete { key, .. } | Self::ConditionCheck { key, .. } => {
                key.to_string()
            }
            Self::ExpectEmpty { query } => query.partition.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::ConditionCheck { .. } => "condition_check",
            Self::ExpectEmpty { .. } => "expect_empty",
        }
    }
}

/// Range query over one partition of the table or of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub index: Option<IndexName>,
    pub partition: String,
    pub sort_prefix: Option<String>,
    pub limit: Option<usize>,
    /// Exclusive lower bound on the sort key
    pub start_after: Option<String>,
}

impl Query {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            index: None,
            partition: partition.into(),
            sort_prefix: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn on_index(mut self, index: IndexName) -> Self {
        self.index = Some(index);
        self
    }

    pub fn sort_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, sort_key: Option<String>) -> Self {
        self.start_after = sort_key;
        self
    }

    /// True if `key` (on this query's table or index) is selected
    pub fn selects(&self, key: &Key) -> bool {
        key.pk == self.partition
            && self
                .sort_prefix
                .as_deref()
                .is_none_or(|prefix| key.sk.starts_with(prefix))
            && self
                .start_after
                .as_deref()
                .is_none_or(|after| key.sk.as_str() > after)
    }
}

/// Result of a [`Query`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Sort key of the last record, set only when more records remain
    pub last_sort_key: Option<String>,
}

impl QueryPage {
    /// Build a page from rows already sorted by sort key
    ///
    /// `rows` may hold one record past `limit`; its presence is how callers
    /// learn that another page exists.
    pub fn from_sorted(rows: Vec<(String, Record)>, limit: Option<usize>) -> Self {
        let Some(limit) = limit else {
            return Self {
                records: rows.into_iter().map(|(_, record)| record).collect(),
                last_sort_key: None,
            };
        };

        let has_more = rows.len() > limit;
        let mut records = Vec::with_capacity(limit.min(rows.len()));
        let mut last_sort_key = None;
        for (sort_key, record) in rows.into_iter().take(limit) {
            last_sort_key = Some(sort_key);
            records.push(record);
        }
        Self {
            records,
            last_sort_key: if has_more { last_sort_key } else { None },
        }
    }
}

/// Full-table scan filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub pk_prefix: Option<String>,
    pub sk_prefix: Option<String>,
    /// Select only items that expired at or before this instant
    pub expired_before: Option<DateTime<Utc>>,
    /// Top-level body attributes to keep; `None` keeps everything
    pub projection: Option<Vec<String>>,
}

impl ScanFilter {
    pub fn pk_prefix(prefix: impl Into<String>) -> Self {
        Self {
            pk_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn expired_before(instant: DateTime<Utc>) -> Self {
        Self {
            expired_before: Some(instant),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &Record, now: DateTime<Utc>) -> bool {
        let prefixes = self
            .pk_prefix
            .as_deref()
            .is_none_or(|p| record.key.pk.starts_with(p))
            && self
                .sk_prefix
                .as_deref()
                .is_none_or(|p| record.key.sk.starts_with(p));
        if !prefixes {
            return false;
        }
        match self.expired_before {
            Some(instant) => record.expires_at.is_some_and(|at| at <= instant),
            None => !record.is_expired_at(now),
        }
    }

    pub fn project(&self, mut record: Record) -> Record {
        if let (Some(attrs), Value::Object(map)) = (&self.projection, &mut record.data) {
            map.retain(|name, _| attrs.iter().any(|a| a == name));
        }
        record
    }
}

/// Shallow JSON merge used by `Operation::Update`
pub fn merge_patch(data: &mut Value, patch: &Map<String, Value>) {
    if !data.is_object() {
        *data = Value::Object(Map::new());
    }
    if let Value::Object(map) = data {
        for (name, value) in patch {
            map.insert(name.clone(), value.clone());
        }
    }
}

/// Single-table document store
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a live item
    async fn get(&self, key: &Key) -> Result<Option<Record>>;

    /// Range query within one partition, ordered by sort key
    async fn query(&self, query: &Query) -> Result<QueryPage>;

    /// Scan the whole table
    async fn scan(&self, filter: &ScanFilter, limit: Option<usize>) -> Result<Vec<Record>>;

    /// Apply every operation or none of them
    ///
    /// A failed condition aborts the transaction with `Error::Conflict`.
    async fn transact(&self, operations: Vec<Operation>) -> Result<()>;

    async fn put(&self, record: Record, condition: Option<Condition>) -> Result<()> {
        self.transact(vec![Operation::Put { record, condition }]).await
    }

    async fn update(
        &self,
        key: &Key,
        patch: Map<String, Value>,
        condition: Option<Condition>,
    ) -> Result<()> {
        self.transact(vec![Operation::Update {
            key: key.clone(),
            patch,
            condition,
        }])
        .await
    }

    async fn delete(&self, key: &Key, condition: Option<Condition>) -> Result<()> {
        self.transact(vec![Operation::Delete {
            key: key.clone(),
            condition,
        }])
        .await
    }
}
