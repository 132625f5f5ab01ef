//! Trait definitions for similarity-graph edges.

use super::SimilarityPair;

/// Decides which pairs become edges of the similarity graph
pub trait ComparisonStrategy: Send + Sync {
    fn is_match(&self, pair: &SimilarityPair) -> bool;

    /// Minimum similarity percent for an edge
    fn threshold(&self) -> u32;

    fn description(&self) -> String;
}

/// Edge when `similarity_percent >= threshold`
#[derive(Debug, Clone)]
pub struct ThresholdStrategy {
    threshold: u32,
}

impl ThresholdStrategy {
    /// Thresholds above 100 are clamped
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.min(100),
        }
    }
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        Self::new(70)
    }
}

impl ComparisonStrategy for ThresholdStrategy {
    fn is_match(&self, pair: &SimilarityPair) -> bool {
        pair.similarity_percent >= self.threshold
    }

    fn threshold(&self) -> u32 {
        self.threshold
    }

    fn description(&self) -> String {
        format!("similarity >= {}%", self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(similarity_percent: u32) -> SimilarityPair {
        SimilarityPair {
            id_a: "a".to_string(),
            id_b: "b".to_string(),
            hamming_distance: 0,
            similarity_percent,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let strategy = ThresholdStrategy::default();
        assert!(strategy.is_match(&pair(70)));
        assert!(!strategy.is_match(&pair(69)));
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(ThresholdStrategy::new(250).threshold(), 100);
        assert_eq!(ThresholdStrategy::new(80).description(), "similarity >= 80%");
    }
}
