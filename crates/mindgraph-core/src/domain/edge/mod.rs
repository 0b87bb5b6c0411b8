//! Edge aggregate and its persistence ports

pub mod entity;
pub mod repository;

pub use entity::Edge;
pub use repository::{EdgeReader, EdgeWriter};
