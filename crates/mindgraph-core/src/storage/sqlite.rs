//! SQLite Store adapter
//!
//! All items live in one `items` table. Every write runs inside a sqlx
//! transaction: the live row is read, the condition is checked, and the
//! write follows on the same connection. Any failure drops the transaction,
//! which rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{Error, Result};

use super::database::{Database, DatabaseConfig};
use super::store::{
    IndexName, Key, Operation, Query, QueryPage, Record, ScanFilter, Store, merge_patch,
};

/// SQLite result codes for a locked or stale-snapshot database
const SQLITE_BUSY_CODES: &[&str] = &["5", "6", "517"];

/// Database row for `items`
#[derive(Debug, FromRow)]
struct ItemRow {
    pk: String,
    sk: String,
    gsi1_pk: Option<String>,
    gsi1_sk: Option<String>,
    gsi2_pk: Option<String>,
    gsi2_sk: Option<String>,
    version: i64,
    data: String,
    expires_at: Option<i64>,
}

impl ItemRow {
    fn into_record(self) -> Result<Record> {
        let index_key = |pk: Option<String>, sk: Option<String>| match (pk, sk) {
            (Some(pk), Some(sk)) => Some(Key { pk, sk }),
            _ => None,
        };

        Ok(Record {
            key: Key::new(self.pk, self.sk),
            gsi1: index_key(self.gsi1_pk, self.gsi1_sk),
            gsi2: index_key(self.gsi2_pk, self.gsi2_sk),
            version: u64::try_from(self.version)
                .map_err(|_| Error::internal(format!("negative version {}", self.version)))?,
            data: serde_json::from_str::<Value>(&self.data)?,
            expires_at: self.expires_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn version_param(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| Error::internal(format!("version {} out of range", version)))
}

/// Map busy or stale-snapshot failures onto a retryable conflict
fn map_db_error(error: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &error {
        if db.code().is_some_and(|code| SQLITE_BUSY_CODES.contains(&code.as_ref())) {
            return Error::conflict("database", "items", db.message());
        }
    }
    Error::DatabaseError(error)
}

/// Store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (and migrate) a database
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let db = Database::new(config)
            .await
            .map_err(|e| Error::internal(format!("{:#}", e)))?;
        Ok(Self::from_database(&db))
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory()).await
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_live(
        conn: &mut SqliteConnection,
        key: &Key,
        now: i64,
    ) -> Result<Option<Record>> {
        let row: Option<ItemRow> = sqlx::query_as(
            r#"
            SELECT * FROM items
            WHERE pk = ? AND sk = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(&key.pk)
        .bind(&key.sk)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

        row.map(ItemRow::into_record).transpose()
    }

    async fn write(conn: &mut SqliteConnection, record: &Record) -> Result<()> {
        let (gsi1_pk, gsi1_sk) = split_index(record.gsi1.as_ref());
        let (gsi2_pk, gsi2_sk) = split_index(record.gsi2.as_ref());

        sqlx::query(
            r#"
            INSERT INTO items (pk, sk, gsi1_pk, gsi1_sk, gsi2_pk, gsi2_sk, version, data, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pk, sk) DO UPDATE SET
                gsi1_pk = excluded.gsi1_pk,
                gsi1_sk = excluded.gsi1_sk,
                gsi2_pk = excluded.gsi2_pk,
                gsi2_sk = excluded.gsi2_sk,
                version = excluded.version,
                data = excluded.data,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&record.key.pk)
        .bind(&record.key.sk)
        .bind(gsi1_pk)
        .bind(gsi1_sk)
        .bind(gsi2_pk)
        .bind(gsi2_sk)
        .bind(version_param(record.version)?)
        .bind(serde_json::to_string(&record.data)?)
        .bind(record.expires_at.map(millis))
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn apply(conn: &mut SqliteConnection, operation: &Operation, now: i64) -> Result<()> {
        match operation {
            Operation::Put { record, condition } => {
                if let Some(condition) = condition {
                    let current = Self::load_live(conn, &record.key, now).await?;
                    condition.check(&record.key, current.as_ref())?;
                }
                Self::write(conn, record).await
            }
            Operation::Update {
                key,
                patch,
                condition,
            } => {
                let current = Self::load_live(conn, key, now).await?;
                if let Some(condition) = condition {
                    condition.check(key, current.as_ref())?;
                }
                let Some(mut record) = current else {
                    return Err(Error::conflict("record", key, "cannot update a missing item"));
                };
                merge_patch(&mut record.data, patch);
                record.version += 1;
                Self::write(conn, &record).await
            }
            Operation::Delete { key, condition } => {
                if let Some(condition) = condition {
                    let current = Self::load_live(conn, key, now).await?;
                    condition.check(key, current.as_ref())?;
                }
                sqlx::query("DELETE FROM items WHERE pk = ? AND sk = ?")
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .execute(&mut *conn)
                    .await
                    .map_err(map_db_error)?;
                Ok(())
            }
            Operation::ConditionCheck { key, condition } => {
                let current = Self::load_live(conn, key, now).await?;
                condition.check(key, current.as_ref())
            }
            Operation::ExpectEmpty { query } => {
                let (pk_col, sk_col) = index_columns(query.index);
                let prefix = query.sort_prefix.as_deref().unwrap_or("");
                let sql = format!(
                    r#"
                    SELECT COUNT(*) FROM items
                    WHERE {pk_col} = ?
                      AND substr({sk_col}, 1, ?) = ?
                      AND {sk_col} > ?
                      AND (expires_at IS NULL OR expires_at > ?)
                    "#
                );
                let remaining: i64 = sqlx::query_scalar(&sql)
                    .bind(&query.partition)
                    .bind(prefix.chars().count() as i64)
                    .bind(prefix)
                    .bind(query.start_after.as_deref().unwrap_or(""))
                    .bind(now)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(map_db_error)?;
                if remaining > 0 {
                    return Err(Error::conflict(
                        "partition",
                        &query.partition,
                        format!("{} items remain", remaining),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn split_index(key: Option<&Key>) -> (Option<&str>, Option<&str>) {
    match key {
        Some(key) => (Some(key.pk.as_str()), Some(key.sk.as_str())),
        None => (None, None),
    }
}

fn index_columns(index: Option<IndexName>) -> (&'static str, &'static str) {
    match index {
        None => ("pk", "sk"),
        Some(IndexName::Gsi1) => ("gsi1_pk", "gsi1_sk"),
        Some(IndexName::Gsi2) => ("gsi2_pk", "gsi2_sk"),
    }
}

/// SQLite `LIMIT` value; negative means unbounded
fn limit_param(limit: Option<usize>) -> i64 {
    limit
        .and_then(|l| i64::try_from(l).ok())
        .unwrap_or(-1)
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &Key) -> Result<Option<Record>> {
        let mut conn = self.pool.acquire().await.map_err(map_db_error)?;
        Self::load_live(&mut *conn, key, millis(Utc::now())).await
    }

    async fn query(&self, query: &Query) -> Result<QueryPage> {
        let (pk_col, sk_col) = index_columns(query.index);
        let prefix = query.sort_prefix.as_deref().unwrap_or("");
        let sql = format!(
            r#"
            SELECT * FROM items
            WHERE {pk_col} = ?
              AND substr({sk_col}, 1, ?) = ?
              AND {sk_col} > ?
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY {sk_col}
            LIMIT ?
            "#
        );

        // one extra row tells whether another page exists
        let fetch = query.limit.map(|l| l.saturating_add(1));
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(&query.partition)
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .bind(query.start_after.as_deref().unwrap_or(""))
            .bind(millis(Utc::now()))
            .bind(limit_param(fetch))
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        let mut sorted = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row.into_record()?;
            let sort_key = record
                .index_key(query.index)
                .map(|k| k.sk.clone())
                .unwrap_or_default();
            sorted.push((sort_key, record));
        }

        debug!(
            partition = %query.partition,
            index = query.index.map(|i| i.as_str()).unwrap_or("table"),
            returned = sorted.len(),
            "SQLite query"
        );
        Ok(QueryPage::from_sorted(sorted, query.limit))
    }

    async fn scan(&self, filter: &ScanFilter, limit: Option<usize>) -> Result<Vec<Record>> {
        let pk_prefix = filter.pk_prefix.as_deref().unwrap_or("");
        let sk_prefix = filter.sk_prefix.as_deref().unwrap_or("");
        let (expiry_clause, instant) = match filter.expired_before {
            Some(instant) => ("expires_at IS NOT NULL AND expires_at <= ?", instant),
            None => ("(expires_at IS NULL OR expires_at > ?)", Utc::now()),
        };
        let sql = format!(
            r#"
            SELECT * FROM items
            WHERE substr(pk, 1, ?) = ?
              AND substr(sk, 1, ?) = ?
              AND {expiry_clause}
            ORDER BY pk, sk
            LIMIT ?
            "#
        );

        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(pk_prefix.chars().count() as i64)
            .bind(pk_prefix)
            .bind(sk_prefix.chars().count() as i64)
            .bind(sk_prefix)
            .bind(millis(instant))
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        rows.into_iter()
            .map(|row| Ok(filter.project(row.into_record()?)))
            .collect()
    }

    async fn transact(&self, operations: Vec<Operation>) -> Result<()> {
        let now = millis(Utc::now());
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        for operation in &operations {
            if let Err(e) = Self::apply(&mut *tx, operation, now).await {
                debug!(
                    operation = operation.kind(),
                    target = %operation.target(),
                    error = %e,
                    "SQLite transaction aborted"
                );
                return Err(e);
            }
        }

        tx.commit().await.map_err(map_db_error)?;
        debug!(operations = operations.len(), "Committed SQLite transaction");
        Ok(())
    }
}
