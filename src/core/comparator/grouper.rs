//! Groups items into clusters using transitive relationships.
//!
//! If A matches B and B matches C, then {A, B, C} forms a single cluster
//! even if A doesn't directly match C.

use super::traits::ComparisonStrategy;
use super::{Cluster, SimilarityPair};
use std::collections::{BTreeMap, HashMap};

/// Union-find over item indices
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            // Path halving
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
    }
}

/// Partitions items into connected components of the similarity graph
pub struct TransitiveGrouper {
    drop_singletons: bool,
}

impl TransitiveGrouper {
    pub fn new(drop_singletons: bool) -> Self {
        Self { drop_singletons }
    }

    /// Cluster `ids` using the pairs `strategy` accepts as edges.
    ///
    /// Members are sorted, the representative is the smallest id, and clusters
    /// come largest first. Pairs naming unknown ids are ignored.
    pub fn group(&self, ids: &[String], pairs: &[SimilarityPair], strategy: &dyn ComparisonStrategy) -> Vec<Cluster> {
        let index: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut sets = DisjointSet::new(ids.len());
        for pair in pairs.iter().filter(|pair| strategy.is_match(pair)) {
            if let (Some(&a), Some(&b)) = (index.get(pair.id_a.as_str()), index.get(pair.id_b.as_str())) {
                sets.union(a, b);
            }
        }

        let mut components: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            components.entry(sets.find(i)).or_default().push(id.clone());
        }

        let mut clusters: Vec<Cluster> = components
            .into_values()
            .filter(|members| !(self.drop_singletons && members.len() < 2))
            .map(|mut members| {
                members.sort();
                members.dedup();
                Cluster::new(members)
            })
            .collect();

        clusters.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then_with(|| a.representative_id.cmp(&b.representative_id))
        });
        clusters
    }
}

impl Default for TransitiveGrouper {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ThresholdStrategy;
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn pair(a: &str, b: &str, similarity_percent: u32) -> SimilarityPair {
        SimilarityPair {
            id_a: a.to_string(),
            id_b: b.to_string(),
            hamming_distance: 64 - similarity_percent * 64 / 100,
            similarity_percent,
        }
    }

    #[test]
    fn no_pairs_no_clusters() {
        let grouper = TransitiveGrouper::default();
        let clusters = grouper.group(&ids(&["a", "b"]), &[], &ThresholdStrategy::default());
        assert!(clusters.is_empty());
    }

    #[test]
    fn transitive_grouping() {
        // A-C alone is below threshold, but A~B and B~C join them
        let grouper = TransitiveGrouper::default();
        let pairs = vec![pair("A", "B", 90), pair("B", "C", 85), pair("A", "C", 40)];

        let clusters = grouper.group(&ids(&["A", "B", "C"]), &pairs, &ThresholdStrategy::new(70));

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, ids(&["A", "B", "C"]));
        assert_eq!(clusters[0].representative_id, "A");
    }

    #[test]
    fn clusters_partition_items() {
        let grouper = TransitiveGrouper::new(false);
        let pairs = vec![pair("d", "c", 95), pair("a", "b", 72), pair("b", "e", 10)];

        let clusters = grouper.group(&ids(&["a", "b", "c", "d", "e"]), &pairs, &ThresholdStrategy::new(70));

        assert_eq!(clusters.len(), 3);
        let mut all: Vec<String> = clusters.iter().flat_map(|c| c.members.clone()).collect();
        all.sort();
        assert_eq!(all, ids(&["a", "b", "c", "d", "e"]));
        assert_eq!(clusters[0].members, ids(&["a", "b"]));
        assert_eq!(clusters[1].members, ids(&["c", "d"]));
        assert_eq!(clusters[1].representative_id, "c");
        assert_eq!(clusters[2].members, ids(&["e"]));
    }

    #[test]
    fn singletons_dropped_by_default() {
        let grouper = TransitiveGrouper::default();
        let pairs = vec![pair("a", "b", 100)];

        let clusters = grouper.group(&ids(&["a", "b", "lonely"]), &pairs, &ThresholdStrategy::default());

        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].contains("a"));
        assert!(!clusters[0].contains("lonely"));
    }
}
