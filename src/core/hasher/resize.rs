//! Luminance downsampling for perceptual hashes.
//!
//! Uses the fast_image_resize crate (SIMD convolution). Every source pixel
//! contributes to the grid, so a one-pixel shift or a re-encode barely moves
//! the cell values.

use crate::error::HashError;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::RgbImage;

/// ITU-R BT.601 luma, rounded
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (r as f64 * 0.299 + g as f64 * 0.587 + b as f64 * 0.114).round() as u8
}

/// Resizes RGB buffers to small luminance grids
pub struct GridResizer {
    resizer: Resizer,
}

impl GridResizer {
    pub fn new() -> Self {
        Self {
            resizer: Resizer::new(),
        }
    }

    /// Luminance plane resized to `width` x `height`, row-major.
    pub fn luminance_grid(
        &mut self,
        item_id: &str,
        pixels: &RgbImage,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, HashError> {
        let (src_width, src_height) = pixels.dimensions();
        if src_width == 0 || src_height == 0 {
            return Err(HashError::EmptyImage {
                item_id: item_id.to_string(),
            });
        }
        if width == 0 || height == 0 {
            return Err(HashError::DecodeError {
                item_id: item_id.to_string(),
                reason: "Invalid destination dimensions".to_string(),
            });
        }

        let luma: Vec<u8> = pixels.pixels().map(|p| luminance(p[0], p[1], p[2])).collect();
        let src_image = Image::from_vec_u8(src_width, src_height, luma, PixelType::U8).map_err(|e| {
            HashError::DecodeError {
                item_id: item_id.to_string(),
                reason: format!("Failed to create source image: {}", e),
            }
        })?;
        let mut dst_image = Image::new(width, height, PixelType::U8);

        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        self.resizer
            .resize(&src_image, &mut dst_image, &options)
            .map_err(|e| HashError::DecodeError {
                item_id: item_id.to_string(),
                reason: format!("Resize failed: {}", e),
            })?;

        Ok(dst_image.into_vec())
    }
}

impl Default for GridResizer {
    fn default() -> Self {
        Self::new()
    }
}
