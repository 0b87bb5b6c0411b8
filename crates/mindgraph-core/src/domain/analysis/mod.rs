//! Keyword extraction and similarity-based connection discovery

pub mod analyzer;
pub mod keywords;

pub use analyzer::{BidirectionalMatch, ConnectionAnalyzer, ConnectionCandidate, MatchReason};
pub use keywords::extract_keywords;
