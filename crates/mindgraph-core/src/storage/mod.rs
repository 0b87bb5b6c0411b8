//! Storage layer
//!
//! The [`Store`] port and its two adapters.
//!
//! - `store`: port types (keys, records, conditions, operations, queries)
//! - `keys`: the single-table key scheme
//! - `cursor`: opaque pagination cursors
//! - `memory`: in-process adapter, used by tests and embedding callers
//! - `sqlite`, `database`, `migrations`: SQLite adapter through sqlx
//!
//! # Usage
//!
//! ```ignore
//! use mindgraph_core::storage::{SqliteStore, Store};
//!
//! let store = SqliteStore::in_memory().await?;
//! let record = store.get(&key).await?;
//! ```

pub mod cursor;
pub mod database;
pub mod keys;
pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

pub use database::{Database, DatabaseConfig};
pub use memory::MemoryStore;
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
pub use sqlite::SqliteStore;
pub use store::{
    Condition, IndexName, Key, Operation, Query, QueryPage, Record, ScanFilter, Store,
};
