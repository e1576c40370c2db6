//! Error types for the cache and its collaborators.

use thiserror::Error;

/// Errors from the injected byte transport.
///
/// Transport failures surface to `load` callers and are never cached:
/// the next request for the same key retries the fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with a non-success status code.
    #[error("HTTP {status} from {address}")]
    Status { status: u16, address: String },

    /// The request could not be completed (connect, timeout, body read).
    #[error("request failed: {0}")]
    Request(String),
}

/// Errors from decoding fetched or disk-cached bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes do not form a decodable asset.
    #[error("malformed asset data: {0}")]
    Malformed(String),
}

/// Errors surfaced by [`ImageCache::load`](crate::cache::ImageCache::load).
///
/// Only critical-path failures appear here. Disk-tier failures degrade to
/// cache misses or skipped writes and never reach the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The caller that owned the in-flight fetch was dropped before it
    /// resolved. Not cached; a retry starts a fresh fetch.
    #[error("fetch interrupted before completion")]
    Interrupted,
}

/// Cache construction errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error while preparing the cache directory.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid cache configuration.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}
