//! Trait definitions for perceptual fingerprinting.

use crate::error::HashError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A perceptual hash algorithm producing at most 64 bits
pub trait FingerprintAlgorithm: Send + Sync {
    /// Short name written to reports, e.g. `dHash`
    fn name(&self) -> &'static str;

    /// Number of meaningful bits in [`FingerprintAlgorithm::hash_pixels`]
    fn bit_width(&self) -> u32;

    fn hash_pixels(&self, item_id: &str, pixels: &RgbImage) -> Result<u64, HashError>;

    fn fingerprint(&self, item_id: &str, pixels: &RgbImage) -> Result<Fingerprint, HashError> {
        Ok(Fingerprint {
            item_id: item_id.to_string(),
            hash: self.hash_pixels(item_id, pixels)?,
            bit_width: self.bit_width(),
        })
    }
}

/// Fingerprint of one successfully decoded item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub item_id: String,
    pub hash: u64,
    pub bit_width: u32,
}

impl Fingerprint {
    /// Hamming distance: popcount of the XOR
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.hash ^ other.hash).count_ones()
    }

    /// `round(100 * (1 - distance / bit_width))`
    pub fn similarity_percent(&self, other: &Fingerprint) -> u32 {
        if self.bit_width == 0 {
            return 100;
        }
        let ratio = 1.0 - self.distance(other) as f64 / self.bit_width as f64;
        (100.0 * ratio).round() as u32
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.hash)
    }
}
