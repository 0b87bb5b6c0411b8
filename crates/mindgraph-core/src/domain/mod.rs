//! Domain layer
//!
//! Aggregates, value objects, domain events and the connection analyzer.
//! Nothing in here performs I/O; persistence is reached only through the
//! reader and writer ports declared next to each aggregate.

pub mod analysis;
pub mod category;
pub mod edge;
pub mod events;
pub mod node;
pub mod page;
pub mod values;

pub use analysis::{BidirectionalMatch, ConnectionAnalyzer, ConnectionCandidate, MatchReason};
pub use category::{Category, CategoryMembership, CategoryReader, CategoryWriter};
pub use edge::{Edge, EdgeReader, EdgeWriter};
pub use events::{DomainEvent, EventPublisher, GraphEvent, InMemoryEventStore};
pub use node::{AppliedChanges, Node, NodeChanges, NodeReader, NodeWriter};
pub use page::{Page, PageRequest};
pub use values::{
    CategoryId, Color, Content, Keywords, NodeId, Tags, Title, UserId, Version, Weight,
};
