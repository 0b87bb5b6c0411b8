//! Infrastructure adapters
//!
//! Store-backed implementations of the domain ports, the idempotency store
//! and the query cache.

pub mod cache;
pub mod idempotency;
pub mod repository;

pub use cache::{CacheKey, QueryCache};
pub use idempotency::{
    IdempotencyKey, IdempotencyRecord, IdempotencyStore, StoreIdempotencyStore, request_hash,
};
pub use repository::{
    CategoryRepository, EdgeRepository, NodeRepository, StoreCategoryReader, StoreEdgeReader,
    StoreNodeReader,
};
