//! # Comparator Module
//!
//! Finds near-duplicates by comparing fingerprints.
//!
//! ## How It Works
//! 1. Compare every unordered pair of fingerprints (Hamming distance, in parallel)
//! 2. Keep pairs the comparison strategy accepts as graph edges
//! 3. Partition items into connected components (transitive grouping)
//! 4. Rank pairs by similarity for the report
//!
//! ## Similarity
//! | Distance (64 bits) | Similarity |
//! |--------------------|------------|
//! | 0                  | 100%       |
//! | 6                  | 91%        |
//! | 19                 | 70%        |
//! | 32                 | 50%        |
//!
//! Cost is quadratic in the number of fingerprints; the pipeline caps the
//! candidate set before calling in here.

mod grouper;
mod traits;

pub use grouper::TransitiveGrouper;
pub use traits::{ComparisonStrategy, ThresholdStrategy};

use crate::core::hasher::Fingerprint;
use crate::events::{null_sender, Event, EventSender, SimilarityEvent};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Default similarity threshold in percent
pub const DEFAULT_THRESHOLD: u32 = 70;

/// Default length of the ranked pair list
pub const DEFAULT_TOP_N: usize = 10;

/// Result of comparing two fingerprints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub id_a: String,
    pub id_b: String,
    pub hamming_distance: u32,
    pub similarity_percent: u32,
}

impl SimilarityPair {
    pub fn between(a: &Fingerprint, b: &Fingerprint) -> Self {
        Self {
            id_a: a.item_id.clone(),
            id_b: b.item_id.clone(),
            hamming_distance: a.distance(b),
            similarity_percent: a.similarity_percent(b),
        }
    }

    /// Most similar first; ties broken by ids so ranking is stable
    fn rank(&self, other: &Self) -> Ordering {
        other
            .similarity_percent
            .cmp(&self.similarity_percent)
            .then_with(|| self.hamming_distance.cmp(&other.hamming_distance))
            .then_with(|| self.id_a.cmp(&other.id_a))
            .then_with(|| self.id_b.cmp(&other.id_b))
    }
}

/// A connected component of the similarity graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: Uuid,
    /// Smallest member id
    pub representative_id: String,
    /// Sorted member ids, representative included
    pub members: Vec<String>,
}

impl Cluster {
    /// `members` must be sorted and non-empty
    pub(crate) fn new(members: Vec<String>) -> Self {
        Self {
            cluster_id: Uuid::new_v4(),
            representative_id: members.first().cloned().unwrap_or_default(),
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.members.binary_search_by(|m| m.as_str().cmp(item_id)).is_ok()
    }
}

/// Every unordered pair, in input order (`i < j`)
pub fn compare_all(fingerprints: &[Fingerprint]) -> Vec<SimilarityPair> {
    let n = fingerprints.len();
    (0..n)
        .into_par_iter()
        .flat_map_iter(|i| ((i + 1)..n).map(move |j| SimilarityPair::between(&fingerprints[i], &fingerprints[j])))
        .collect()
}

/// Sort pairs most similar first
pub fn rank_pairs(pairs: &mut [SimilarityPair]) {
    pairs.sort_by(SimilarityPair::rank);
}

/// Output of one clustering pass
#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    /// All evaluated pairs, ranked
    pub pairs: Vec<SimilarityPair>,
    /// Head of `pairs`
    pub top_pairs: Vec<SimilarityPair>,
    pub clusters: Vec<Cluster>,
}

impl ClusterOutcome {
    pub fn pairs_evaluated(&self) -> usize {
        self.pairs.len()
    }
}

/// Pairwise comparison plus transitive clustering
pub struct SimilarityClusterer {
    strategy: Box<dyn ComparisonStrategy>,
    grouper: TransitiveGrouper,
    top_n: usize,
    events: EventSender,
}

impl SimilarityClusterer {
    pub fn new(threshold: u32) -> Self {
        Self::with_strategy(Box::new(ThresholdStrategy::new(threshold)))
    }

    pub fn with_strategy(strategy: Box<dyn ComparisonStrategy>) -> Self {
        Self {
            strategy,
            grouper: TransitiveGrouper::default(),
            top_n: DEFAULT_TOP_N,
            events: null_sender(),
        }
    }

    pub fn with_drop_singletons(mut self, drop_singletons: bool) -> Self {
        self.grouper = TransitiveGrouper::new(drop_singletons);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.strategy.threshold()
    }

    pub fn cluster(&self, fingerprints: &[Fingerprint]) -> ClusterOutcome {
        self.events.send(Event::Similarity(SimilarityEvent::Started {
            fingerprints: fingerprints.len(),
        }));

        let mut pairs = compare_all(fingerprints);
        rank_pairs(&mut pairs);

        let ids: Vec<String> = fingerprints.iter().map(|fp| fp.item_id.clone()).collect();
        let clusters = self.grouper.group(&ids, &pairs, self.strategy.as_ref());

        for cluster in &clusters {
            self.events.send(Event::Similarity(SimilarityEvent::ClusterFound {
                cluster_id: cluster.cluster_id.to_string(),
                member_count: cluster.len(),
            }));
        }

        tracing::debug!(
            pairs = pairs.len(),
            clusters = clusters.len(),
            rule = %self.strategy.description(),
            "Clustering complete"
        );

        self.events.send(Event::Similarity(SimilarityEvent::Completed {
            pairs_evaluated: pairs.len(),
            clusters: clusters.len(),
        }));

        let top_pairs = pairs.iter().take(self.top_n).cloned().collect();
        ClusterOutcome {
            pairs,
            top_pairs,
            clusters,
        }
    }
}

impl Default for SimilarityClusterer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
