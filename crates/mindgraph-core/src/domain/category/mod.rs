//! Category aggregate, memberships and their persistence ports

pub mod entity;
pub mod repository;

pub use entity::{
    Category, CategoryMembership, MAX_CATEGORY_DESCRIPTION_CHARS, MAX_CATEGORY_NAME_CHARS,
};
pub use repository::{CategoryReader, CategoryWriter};
