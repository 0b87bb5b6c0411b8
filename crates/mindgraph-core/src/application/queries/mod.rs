//! Read side
//!
//! Query services read through the store-backed readers and cache their
//! results in the shared [`QueryCache`](crate::infrastructure::QueryCache).
//! They never write; freshness comes from the command handlers
//! invalidating a user's entries after each commit.

mod category;
mod node;

pub use category::{CategoryDetail, CategoryQueryService};
pub use node::{GraphStats, GraphView, KeywordCount, NodeDetail, NodeQueryService};

use crate::config::LimitsConfig;
use crate::domain::page::PageRequest;

/// Clamp a caller's page request into the configured bounds
pub(crate) fn clamp_page(limits: &LimitsConfig, page: PageRequest) -> PageRequest {
    let limit = match page.limit {
        0 => limits.default_page_size,
        n => n.min(limits.max_page_size),
    };
    PageRequest {
        limit: limit.max(1),
        cursor: page.cursor,
    }
}

/// Cache parameter string of a page request
pub(crate) fn page_params(page: &PageRequest) -> String {
    format!("{}:{}", page.limit, page.cursor.as_deref().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page() {
        let limits = LimitsConfig::default();
        assert_eq!(clamp_page(&limits, PageRequest::first(0)).limit, 20);
        assert_eq!(clamp_page(&limits, PageRequest::first(7)).limit, 7);
        assert_eq!(clamp_page(&limits, PageRequest::first(5000)).limit, 100);

        let page = clamp_page(&limits, PageRequest::after(10, "abc"));
        assert_eq!(page_params(&page), "10:abc");
    }
}
