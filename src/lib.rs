//! imagevault - two-tier binary asset cache with request coalescing.
//!
//! This library caches immutable byte blobs (typically images) behind a
//! bounded in-memory tier and a persistent disk tier, and guarantees at
//! most one outstanding fetch per key no matter how many callers request
//! it concurrently.
//!
//! # High-Level API
//!
//! [`ImageCache`] is the facade collaborators use:
//!
//! ```ignore
//! use imagevault::{CacheConfig, ImageCache, ReqwestTransport, RgbaDecoder, Variant};
//!
//! let cache = ImageCache::new(
//!     CacheConfig::new(),
//!     ReqwestTransport::new()?,
//!     RgbaDecoder::new(),
//! )?;
//!
//! let avatar = cache.load("https://cdn.example.com/avatar.jpg", Variant::Thumbnail).await?;
//! cache.preload(["https://cdn.example.com/a.jpg", "https://cdn.example.com/b.jpg"], Variant::Full);
//! ```
//!
//! The transport and decoder are trait seams, so hosts can inject their
//! own HTTP stack and codec; [`ReqwestTransport`] and [`RgbaDecoder`]
//! are the batteries-included defaults.

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod decode;
pub mod disk;
pub mod error;
mod janitor;
pub mod key;
pub mod memory;
pub mod pressure;
pub mod stats;
pub mod transport;

pub use cache::ImageCache;
pub use config::{CacheConfig, DiskCacheConfig, MemoryCacheConfig};
pub use decode::{AssetDecoder, ImageAsset, RgbaDecoder};
pub use error::{CacheError, DecodeError, FetchError, TransportError};
pub use key::{CacheKey, Variant};
pub use pressure::MemoryPressure;
pub use stats::CacheStats;
pub use transport::{BlobTransport, ReqwestTransport};

/// Version of the imagevault library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
