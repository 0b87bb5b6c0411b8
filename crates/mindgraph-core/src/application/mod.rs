//! Application layer
//!
//! Orchestrates the domain over the store: request context, the unit of
//! work with its optimistic retry, the write-side command handlers and the
//! cached read-side query services.

pub mod commands;
pub mod context;
pub mod queries;
pub mod retry;
pub mod unit_of_work;

pub use commands::{
    BulkConnectResult, BulkCreateResult, BulkDeleteResult, BulkItemFailure,
    CategoryCommandHandler, CommandServices, CreateCategoryCommand, CreateNodeCommand,
    CreateNodeResult, DeleteNodeResult, EdgeCommandHandler, NodeCommandHandler,
    UpdateCategoryCommand, UpdateNodeCommand,
};
pub use context::RequestContext;
pub use queries::{
    CategoryDetail, CategoryQueryService, GraphStats, GraphView, KeywordCount, NodeDetail,
    NodeQueryService,
};
pub use retry::RetryPolicy;
pub use unit_of_work::{UnitOfWork, UnitOfWorkState};
