//! Connection discovery
//!
//! Scores keyword similarity between a node and a corpus of the user's
//! other nodes and proposes edges for the best matches.
//!
//! The score of `a -> b` is the Jaccard index of the two keyword sets plus
//! a directional tag bonus: `tag_bonus * |tags(a) ∩ tags(b)| / |tags(a)|`.
//! The bonus only applies when the keyword sets overlap, so tags alone never
//! create an edge. Because the bonus is normalised by the source's tag
//! count, `score(a, b)` and `score(b, a)` can differ.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::domain::node::Node;
use crate::domain::values::NodeId;

/// A proposed connection from the analysed node to `target_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionCandidate {
    pub target_id: NodeId,
    pub score: f64,
    pub reason: MatchReason,
}

/// Why two nodes matched
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchReason {
    pub shared_keywords: Vec<String>,
    pub shared_tags: Vec<String>,
}

/// A pair found by batch analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidirectionalMatch {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub forward_score: f64,
    pub reverse_score: f64,
}

impl BidirectionalMatch {
    /// Weight of the resulting edge; always the forward direction's score
    pub fn weight(&self) -> f64 {
        self.forward_score
    }
}

/// Keyword-similarity connection analyzer
#[derive(Debug, Clone)]
pub struct ConnectionAnalyzer {
    config: AnalyzerConfig,
}

impl Default for ConnectionAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl ConnectionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Maximum number of candidates returned by [`Self::find_connections`]
    pub fn effective_limit(&self) -> usize {
        self.config.max_connections.min(self.config.max_connections_cap)
    }

    /// Directional similarity of `source` to `target` in [0, 1]
    pub fn similarity(&self, source: &Node, target: &Node) -> f64 {
        self.score(source, target).0
    }

    /// True if `score` is high enough to connect
    pub fn passes(&self, score: f64) -> bool {
        score >= self.config.similarity_threshold
    }

    /// Rank corpus nodes by similarity to `node`
    ///
    /// Skips the node itself and archived nodes, drops scores below the
    /// threshold, stable-sorts by descending score and truncates to the
    /// effective limit.
    pub fn find_connections(&self, node: &Node, corpus: &[Node]) -> Vec<ConnectionCandidate> {
        if node.keywords.is_empty() || corpus.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<ConnectionCandidate> = corpus
            .iter()
            .filter(|other| other.id != node.id && !other.archived)
            .filter_map(|other| {
                let (score, reason) = self.score(node, other);
                self.passes(score).then(|| ConnectionCandidate {
                    target_id: other.id,
                    score,
                    reason,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.effective_limit());

        debug!(
            node_id = %node.id,
            corpus_size = corpus.len(),
            candidates = candidates.len(),
            "Connection analysis complete"
        );
        candidates
    }

    /// Score every ordered pair inside a batch
    ///
    /// A pair `(a, b)` is reported once, with `a` earlier in the slice than
    /// `b`, when either direction clears the threshold. Archived nodes take
    /// no part. Each node keeps at most the effective limit of matches as
    /// source.
    pub fn analyze_bidirectional(&self, nodes: &[Node]) -> Vec<BidirectionalMatch> {
        let limit = self.effective_limit();
        let mut matches = Vec::new();

        for (i, source) in nodes.iter().enumerate() {
            if source.archived {
                continue;
            }
            let mut local: Vec<BidirectionalMatch> = nodes
                .iter()
                .skip(i + 1)
                .filter(|target| target.id != source.id && !target.archived)
                .filter_map(|target| {
                    let forward = self.similarity(source, target);
                    let reverse = self.similarity(target, source);
                    (self.passes(forward) || self.passes(reverse)).then(|| BidirectionalMatch {
                        source_id: source.id,
                        target_id: target.id,
                        forward_score: forward,
                        reverse_score: reverse,
                    })
                })
                .collect();

            local.sort_by(|a, b| {
                b.forward_score
                    .max(b.reverse_score)
                    .total_cmp(&a.forward_score.max(a.reverse_score))
            });
            local.truncate(limit);
            matches.extend(local);
        }

        debug!(
            batch_size = nodes.len(),
            matches = matches.len(),
            "Bidirectional analysis complete"
        );
        matches
    }

    fn score(&self, source: &Node, target: &Node) -> (f64, MatchReason) {
        if source.keywords.is_empty() || target.keywords.is_empty() {
            return (0.0, MatchReason::default());
        }

        let shared_keywords = source.keywords.shared_with(&target.keywords);
        if shared_keywords.is_empty() {
            return (0.0, MatchReason::default());
        }
        let union = source.keywords.union_len(&target.keywords);
        let jaccard = shared_keywords.len() as f64 / union as f64;

        let shared_tags: Vec<String> = source
            .tags
            .iter()
            .filter(|tag| target.tags.contains(tag))
            .cloned()
            .collect();
        let bonus = if source.tags.is_empty() {
            0.0
        } else {
            self.config.tag_bonus * shared_tags.len() as f64 / source.tags.len() as f64
        };

        let score = (jaccard + bonus).clamp(0.0, 1.0);
        (
            score,
            MatchReason {
                shared_keywords,
                shared_tags,
            },
        )
    }
}
