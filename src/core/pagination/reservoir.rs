//! Fixed-capacity uniform sample over a stream of unknown length.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reservoir sampler (Algorithm R).
///
/// After `n` offers each item is retained with probability `capacity / n`.
pub struct ReservoirSampler<T> {
    capacity: usize,
    seen: usize,
    items: Vec<T>,
    rng: StdRng,
}

impl<T> ReservoirSampler<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    pub fn seeded(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity),
            rng,
        }
    }

    pub fn offer(&mut self, item: T) {
        let index = self.seen;
        self.seen += 1;

        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }
        // Replace a random slot with probability capacity / seen
        let slot = self.rng.gen_range(0..=index);
        if slot < self.capacity {
            self.items[slot] = item;
        }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
