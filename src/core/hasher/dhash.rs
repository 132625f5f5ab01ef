//! Difference Hash (dHash) implementation.
//!
//! dHash works by:
//! 1. Converting the image to luminance
//! 2. Resizing it to a 9x8 grid with a bilinear convolution filter
//! 3. Comparing each cell to the one on its right
//! 4. Setting the bit when the left cell is brighter
//!
//! Bits are emitted row by row, first comparison in the most significant bit.

use super::resize::GridResizer;
use super::traits::FingerprintAlgorithm;
use crate::error::HashError;
use image::RgbImage;

const GRID_WIDTH: u32 = 9;
const GRID_HEIGHT: u32 = 8;

/// 64-bit difference hash
#[derive(Debug, Clone, Copy, Default)]
pub struct DifferenceHasher;

impl DifferenceHasher {
    pub fn new() -> Self {
        Self
    }
}

impl FingerprintAlgorithm for DifferenceHasher {
    fn name(&self) -> &'static str {
        "dHash"
    }

    fn bit_width(&self) -> u32 {
        (GRID_WIDTH - 1) * GRID_HEIGHT
    }

    fn hash_pixels(&self, item_id: &str, pixels: &RgbImage) -> Result<u64, HashError> {
        let grid = GridResizer::new().luminance_grid(item_id, pixels, GRID_WIDTH, GRID_HEIGHT)?;
        let mut hash = 0u64;
        for row in grid.chunks(GRID_WIDTH as usize) {
            for pair in row.windows(2) {
                hash = (hash << 1) | u64::from(pair[0] > pair[1]);
            }
        }
        Ok(hash)
    }
}
