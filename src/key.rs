//! Cache keys and storage path derivation.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Asset variant requested by the caller.
///
/// The same address cached under different variants produces distinct
/// cache entries and distinct disk records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// The asset at its original decoded size.
    Full,
    /// A downscaled rendition for list views and previews.
    Thumbnail,
}

impl Variant {
    /// String form used for the on-disk directory layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Full => "full",
            Variant::Thumbnail => "thumbnail",
        }
    }
}

/// Cache key uniquely identifying a cached asset.
///
/// Combines the logical address (typically a URL) with the requested
/// [`Variant`]. Two keys are equal iff both components match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    address: String,
    variant: Variant,
}

impl CacheKey {
    /// Create a new cache key.
    pub fn new(address: impl Into<String>, variant: Variant) -> Self {
        Self {
            address: address.into(),
            variant,
        }
    }

    /// The logical address this key refers to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The variant this key refers to.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Stable, filesystem-safe file name for this key.
    ///
    /// The name is the SHA-256 digest of the address, hex encoded, so it
    /// is deterministic across process restarts, collision-resistant for
    /// distinct addresses, and never contains path separators or
    /// parent-directory sequences.
    pub fn storage_file_name(&self) -> String {
        let digest = Sha256::digest(self.address.as_bytes());
        format!("{}.bin", hex::encode(digest))
    }

    /// Full path for this key's disk record under `cache_dir`.
    ///
    /// Creates a hierarchical path structure:
    /// ```text
    /// <cache_dir>/<variant>/<hh>/<hash>.bin
    /// ```
    /// where `<hh>` is the first two hex characters of the hash, fanning
    /// records out so no single directory grows unbounded.
    pub fn storage_path(&self, cache_dir: &Path) -> PathBuf {
        let name = self.storage_file_name();
        cache_dir
            .join(self.variant.as_str())
            .join(&name[..2])
            .join(name)
    }
}
