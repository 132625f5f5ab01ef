//! Thumbnail decoding from downloaded bytes.
//!
//! JPEG goes through zune-jpeg first and falls back to the image crate;
//! everything else is decoded by the image crate.

use crate::error::HashError;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba};
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// Formats the decoder distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Other,
}

impl ImageFormat {
    /// Format from a declared mime type such as `image/jpeg`
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("png") {
            Self::Png
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Self::Jpeg
        } else {
            Self::Other
        }
    }

    /// Format from magic bytes; the rendition may differ from the original
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Self::Jpeg
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Self::Png
        } else {
            Self::Other
        }
    }
}

/// Decode `bytes` into an RGB pixel grid.
///
/// Magic bytes win over the declared mime type.
pub fn decode(bytes: &[u8], mime: &str, item_id: &str) -> Result<RgbImage, HashError> {
    if bytes.is_empty() {
        return Err(HashError::EmptyImage {
            item_id: item_id.to_string(),
        });
    }

    let format = match ImageFormat::sniff(bytes) {
        ImageFormat::Other => ImageFormat::from_mime(mime),
        sniffed => sniffed,
    };

    let image = match format {
        ImageFormat::Jpeg => decode_jpeg(bytes, item_id).or_else(|_| decode_fallback(bytes, item_id))?,
        _ => decode_fallback(bytes, item_id)?,
    };

    if image.width() == 0 || image.height() == 0 {
        return Err(HashError::EmptyImage {
            item_id: item_id.to_string(),
        });
    }
    Ok(image.to_rgb8())
}

fn decode_jpeg(bytes: &[u8], item_id: &str) -> Result<DynamicImage, HashError> {
    let failed = |reason: String| HashError::DecodeError {
        item_id: item_id.to_string(),
        reason,
    };

    let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder
        .decode()
        .map_err(|e| failed(format!("zune-jpeg decode failed: {:?}", e)))?;
    let info = decoder
        .info()
        .ok_or_else(|| failed("missing image info".to_string()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    let image = match decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB) {
        ColorSpace::RGB => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgb8),
        ColorSpace::RGBA => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgba8),
        ColorSpace::Luma => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels)
            .map(DynamicImage::ImageLuma8),
        other => return Err(failed(format!("unsupported colorspace {:?}", other))),
    };
    image.ok_or_else(|| failed("pixel buffer size mismatch".to_string()))
}

fn decode_fallback(bytes: &[u8], item_id: &str) -> Result<DynamicImage, HashError> {
    image::load_from_memory(bytes).map_err(|e| match e {
        image::ImageError::Unsupported(unsupported) => HashError::UnsupportedFormat {
            format: unsupported.to_string(),
        },
        other => HashError::DecodeError {
            item_id: item_id.to_string(),
            reason: other.to_string(),
        },
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Encoded test images.

    use image::{ImageFormat as Encoding, RgbImage};
    use std::io::Cursor;

    pub fn encode(image: &RgbImage, format: Encoding) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    /// Horizontal gradient, bright on the left
    pub fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            let v = 255 - (x * 255 / (width - 1)) as u8;
            image::Rgb([v, v, v])
        })
    }

    /// Horizontal gradient, bright on the right
    pub fn mirrored_gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / (width - 1)) as u8;
            image::Rgb([v, v, v])
        })
    }

    /// Smooth waves under a one-pixel checkerboard, sampled `shift` pixels
    /// to the right
    pub fn textured(width: u32, height: u32, shift: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let (fx, fy) = ((x + shift) as f64, y as f64);
            let wave = 60.0 * (fx / 19.0).sin() + 40.0 * (fy / 23.0 + fx / 31.0).cos();
            let grain = if (x + shift + y) % 2 == 0 { 15.0 } else { -15.0 };
            let v = (128.0 + wave + grain).clamp(0.0, 255.0) as u8;
            image::Rgb([v, v, v])
        })
    }
}
