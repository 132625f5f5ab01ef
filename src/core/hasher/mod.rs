//! # Hasher Module
//!
//! Decodes downloaded thumbnails and computes perceptual fingerprints.
//!
//! ## How It Works
//! 1. Decode JPEG (zune-jpeg, image crate fallback) or PNG into RGB pixels
//! 2. Convert to luminance and resize to a 9x8 grid (bilinear convolution)
//! 3. Compare horizontal neighbours to get a 64-bit difference hash
//! 4. Compare fingerprints using Hamming distance
//!
//! Hashing is deterministic: identical bytes always give the same fingerprint.
//!
//! ## Example
//! ```rust,ignore
//! use photo_library_scan::core::hasher::PerceptualHasher;
//!
//! let hasher = PerceptualHasher::new();
//! let fingerprint = hasher.fingerprint_bytes("item-1", &bytes, "image/jpeg")?;
//! println!("{} {}", fingerprint.item_id, fingerprint.to_hex());
//! ```

pub mod decode;
mod dhash;
mod resize;
mod traits;

pub use decode::ImageFormat;
pub use dhash::DifferenceHasher;
pub use resize::{luminance, GridResizer};
pub use traits::{Fingerprint, FingerprintAlgorithm};

use crate::error::HashError;
use image::RgbImage;

/// Decoder plus fingerprint algorithm (dHash by default)
pub struct PerceptualHasher {
    algorithm: Box<dyn FingerprintAlgorithm>,
}

impl PerceptualHasher {
    pub fn new() -> Self {
        Self::with_algorithm(Box::new(DifferenceHasher::new()))
    }

    pub fn with_algorithm(algorithm: Box<dyn FingerprintAlgorithm>) -> Self {
        Self { algorithm }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn bit_width(&self) -> u32 {
        self.algorithm.bit_width()
    }

    pub fn decode(&self, bytes: &[u8], mime: &str, item_id: &str) -> Result<RgbImage, HashError> {
        decode::decode(bytes, mime, item_id)
    }

    /// Fails with [`HashError::EmptyImage`] for a zero-sized buffer
    pub fn compute_fingerprint(&self, item_id: &str, pixels: &RgbImage) -> Result<Fingerprint, HashError> {
        self.algorithm.fingerprint(item_id, pixels)
    }

    /// Decode and fingerprint in one step
    pub fn fingerprint_bytes(&self, item_id: &str, bytes: &[u8], mime: &str) -> Result<Fingerprint, HashError> {
        let pixels = self.decode(bytes, mime, item_id)?;
        self.compute_fingerprint(item_id, &pixels)
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}
