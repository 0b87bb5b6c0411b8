//! Node aggregate and its persistence ports

pub mod entity;
pub mod repository;

pub use entity::{AppliedChanges, Node, NodeChanges};
pub use repository::{NodeReader, NodeWriter};
