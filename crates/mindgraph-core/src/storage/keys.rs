//! Single-table key scheme
//!
//! | Item        | PK                        | SK                       |
//! |-------------|---------------------------|--------------------------|
//! | Node        | `USER#u#NODE#n`           | `METADATA#v0`            |
//! | Edge        | `USER#u#NODE#src`         | `EDGE#RELATES_TO#dst`    |
//! | Category    | `USER#u#CATEGORY#c`       | `METADATA#v0`            |
//! | Membership  | `USER#u#CATEGORY#c`       | `NODE#n`                 |
//! | Idempotency | `IDEMPOTENCY#u#op`        | `REQUEST#hash`           |
//!
//! GSI1 lists a user's nodes (`USER#u` / `NODE#n`), edges
//! (`USER#u#EDGE` / `NODE#src#TARGET#dst`) and categories
//! (`USER#u#CATEGORY` / `CATEGORY#c`). GSI2 finds edges by target
//! (`USER#u#EDGE#TARGET#dst` / `SOURCE#src`) and categories by node
//! (`USER#u#NODE#n#CATEGORY` / `CATEGORY#c`).

use crate::domain::values::{CategoryId, NodeId, UserId};

use super::store::Key;

pub const METADATA_SK: &str = "METADATA#v0";
pub const NODE_SK_PREFIX: &str = "NODE#";
pub const EDGE_SK_PREFIX: &str = "EDGE#RELATES_TO#";
pub const CATEGORY_SK_PREFIX: &str = "CATEGORY#";
pub const SOURCE_SK_PREFIX: &str = "SOURCE#";
pub const REQUEST_SK_PREFIX: &str = "REQUEST#";
pub const IDEMPOTENCY_PK_PREFIX: &str = "IDEMPOTENCY#";

// ========== Nodes ==========

pub fn node_pk(user_id: &UserId, node_id: NodeId) -> String {
    format!("USER#{}#NODE#{}", user_id, node_id)
}

pub fn node_key(user_id: &UserId, node_id: NodeId) -> Key {
    Key::new(node_pk(user_id, node_id), METADATA_SK)
}

/// GSI1 partition holding all of a user's nodes
pub fn user_nodes_partition(user_id: &UserId) -> String {
    format!("USER#{}", user_id)
}

pub fn node_gsi1(user_id: &UserId, node_id: NodeId) -> Key {
    Key::new(user_nodes_partition(user_id), format!("{}{}", NODE_SK_PREFIX, node_id))
}

// ========== Edges ==========

pub fn edge_key(user_id: &UserId, source_id: NodeId, target_id: NodeId) -> Key {
    Key::new(
        node_pk(user_id, source_id),
        format!("{}{}", EDGE_SK_PREFIX, target_id),
    )
}

/// GSI1 partition holding all of a user's edges
pub fn user_edges_partition(user_id: &UserId) -> String {
    format!("USER#{}#EDGE", user_id)
}

pub fn edge_gsi1(user_id: &UserId, source_id: NodeId, target_id: NodeId) -> Key {
    Key::new(
        user_edges_partition(user_id),
        format!("NODE#{}#TARGET#{}", source_id, target_id),
    )
}

/// GSI2 partition holding the edges that point at `target_id`
pub fn incoming_edges_partition(user_id: &UserId, target_id: NodeId) -> String {
    format!("USER#{}#EDGE#TARGET#{}", user_id, target_id)
}

pub fn edge_gsi2(user_id: &UserId, source_id: NodeId, target_id: NodeId) -> Key {
    Key::new(
        incoming_edges_partition(user_id, target_id),
        format!("{}{}", SOURCE_SK_PREFIX, source_id),
    )
}

// ========== Categories ==========

pub fn category_pk(user_id: &UserId, category_id: CategoryId) -> String {
    format!("USER#{}#CATEGORY#{}", user_id, category_id)
}

pub fn category_key(user_id: &UserId, category_id: CategoryId) -> Key {
    Key::new(category_pk(user_id, category_id), METADATA_SK)
}

/// GSI1 partition holding all of a user's categories
pub fn user_categories_partition(user_id: &UserId) -> String {
    format!("USER#{}#CATEGORY", user_id)
}

pub fn category_gsi1(user_id: &UserId, category_id: CategoryId) -> Key {
    Key::new(
        user_categories_partition(user_id),
        format!("{}{}", CATEGORY_SK_PREFIX, category_id),
    )
}

pub fn membership_key(user_id: &UserId, category_id: CategoryId, node_id: NodeId) -> Key {
    Key::new(
        category_pk(user_id, category_id),
        format!("{}{}", NODE_SK_PREFIX, node_id),
    )
}

/// GSI2 partition holding the categories a node belongs to
pub fn node_categories_partition(user_id: &UserId, node_id: NodeId) -> String {
    format!("USER#{}#NODE#{}#CATEGORY", user_id, node_id)
}

pub fn membership_gsi2(user_id: &UserId, category_id: CategoryId, node_id: NodeId) -> Key {
    Key::new(
        node_categories_partition(user_id, node_id),
        format!("{}{}", CATEGORY_SK_PREFIX, category_id),
    )
}

// ========== Idempotency ==========

pub fn idempotency_key(user_id: &UserId, operation: &str, request_hash: &str) -> Key {
    Key::new(
        format!("{}{}#{}", IDEMPOTENCY_PK_PREFIX, user_id, operation),
        format!("{}{}", REQUEST_SK_PREFIX, request_hash),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_and_edge_keys_are_bit_exact() {
        let user = UserId::new("u1").unwrap();
        let a = NodeId::parse("00000000-0000-4000-8000-000000000001").unwrap();
        let b = NodeId::parse("00000000-0000-4000-8000-000000000002").unwrap();

        let node = node_key(&user, a);
        assert_eq!(node.pk, "USER#u1#NODE#00000000-0000-4000-8000-000000000001");
        assert_eq!(node.sk, "METADATA#v0");

        let edge = edge_key(&user, a, b);
        assert_eq!(edge.pk, node.pk);
        assert_eq!(edge.sk, "EDGE#RELATES_TO#00000000-0000-4000-8000-000000000002");

        assert_eq!(edge_gsi1(&user, a, b).pk, "USER#u1#EDGE");
        assert_eq!(
            edge_gsi2(&user, a, b).pk,
            "USER#u1#EDGE#TARGET#00000000-0000-4000-8000-000000000002"
        );
    }

    #[test]
    fn test_edge_sort_keys_do_not_collide_with_metadata() {
        let user = UserId::new("u1").unwrap();
        let a = NodeId::generate();
        let edge = edge_key(&user, a, NodeId::generate());
        assert!(!edge.sk.starts_with("METADATA"));
        assert!(edge.sk.starts_with(EDGE_SK_PREFIX));
    }

    #[test]
    fn test_membership_lives_in_category_partition() {
        let user = UserId::new("u1").unwrap();
        let category = CategoryId::generate();
        let node = NodeId::generate();

        assert_eq!(membership_key(&user, category, node).pk, category_key(&user, category).pk);
        assert_eq!(
            membership_gsi2(&user, category, node).pk,
            format!("USER#u1#NODE#{}#CATEGORY", node)
        );
    }

    #[test]
    fn test_idempotency_key() {
        let user = UserId::new("u1").unwrap();
        let key = idempotency_key(&user, "create_node", "abc");
        assert_eq!(key.pk, "IDEMPOTENCY#u1#create_node");
        assert_eq!(key.sk, "REQUEST#abc");
    }
}
