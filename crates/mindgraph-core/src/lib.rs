//! Mindgraph Core Library
//!
//! A personal knowledge graph: users write short text nodes and the
//! library links similar nodes with weighted edges. This crate provides:
//! - Domain aggregates (nodes, edges, categories) and value objects
//! - Keyword extraction and the connection analyzer
//! - A single-table `Store` port with in-memory and SQLite adapters
//! - Unit of work with optimistic concurrency and bounded retry
//! - Idempotent creates and a cached CQRS read side

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;
pub mod telemetry;

pub use error::{Error, ErrorKind, Result, ResultExt};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::application::{
        CategoryCommandHandler, CategoryQueryService, CommandServices, EdgeCommandHandler,
        NodeCommandHandler, NodeQueryService, RequestContext,
    };
    pub use crate::config::Config;
    pub use crate::domain::{NodeId, UserId};
    pub use crate::error::{Error, Result};
}
