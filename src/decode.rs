//! Decoded assets and the decoder seam.
//!
//! Decoding is a pure function supplied by the caller through
//! [`AssetDecoder`]; the cache never inspects bytes itself. The crate
//! ships [`RgbaDecoder`] as the default image decoder.

use crate::error::DecodeError;
use crate::key::Variant;
use image::GenericImageView;
use std::sync::Arc;

/// A decoded, immutable asset plus its approximate memory cost.
///
/// Pixel data sits behind an `Arc`, so clones are cheap and every caller
/// that receives the asset shares one allocation. Treated as immutable
/// after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    width: u32,
    height: u32,
    pixels: Arc<Vec<u8>>,
}

impl ImageAsset {
    /// Create an asset from raw RGBA8 pixel data.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels: Arc::new(pixels),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Approximate memory cost in bytes, used for eviction accounting.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Pure decoder turning fetched or disk-cached bytes into an asset.
pub trait AssetDecoder: Send + Sync {
    /// Decode `bytes` into an asset for the requested variant.
    ///
    /// Must be deterministic; failures mean the bytes are malformed, not
    /// that the operation should be retried with the same input.
    fn decode(&self, bytes: &[u8], variant: Variant) -> Result<ImageAsset, DecodeError>;
}

/// Default thumbnail bounding box in pixels.
const DEFAULT_THUMBNAIL_MAX_DIM: u32 = 256;

/// Default decoder producing RGBA8 assets via the `image` crate.
///
/// For [`Variant::Thumbnail`], images larger than the configured bounding
/// box are downscaled to fit it, preserving aspect ratio.
#[derive(Debug, Clone)]
pub struct RgbaDecoder {
    thumbnail_max_dim: u32,
}

impl RgbaDecoder {
    /// Create a decoder with the default thumbnail bounding box.
    pub fn new() -> Self {
        Self {
            thumbnail_max_dim: DEFAULT_THUMBNAIL_MAX_DIM,
        }
    }

    /// Create a decoder with a custom thumbnail bounding box.
    pub fn with_thumbnail_max_dim(thumbnail_max_dim: u32) -> Self {
        Self { thumbnail_max_dim }
    }
}

impl Default for RgbaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetDecoder for RgbaDecoder {
    fn decode(&self, bytes: &[u8], variant: Variant) -> Result<ImageAsset, DecodeError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| DecodeError::Malformed(format!("{}", e)))?;

        let img = match variant {
            Variant::Thumbnail
                if img.width() > self.thumbnail_max_dim
                    || img.height() > self.thumbnail_max_dim =>
            {
                img.thumbnail(self.thumbnail_max_dim, self.thumbnail_max_dim)
            }
            _ => img,
        };

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(ImageAsset::from_rgba8(width, height, rgba.into_raw()))
    }
}
