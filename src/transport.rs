//! Byte transport abstraction for cache-miss fetches.
//!
//! The cache never talks to the network directly; it delegates to an
//! injected [`BlobTransport`]. This keeps the fetch path mockable in
//! tests and lets hosts supply their own client tuning.

use crate::error::TransportError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Async transport fetching the raw bytes behind an address.
pub trait BlobTransport: Send + Sync {
    /// Fetch the bytes at `address`.
    ///
    /// # Arguments
    ///
    /// * `address` - The logical address to fetch, typically a URL
    ///
    /// # Returns
    ///
    /// The raw (still encoded) bytes or a transport error.
    fn fetch(&self, address: &str) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// Default User-Agent string for HTTP requests.
const DEFAULT_USER_AGENT: &str = concat!("imagevault/", env!("CARGO_PKG_VERSION"));

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport implementation using reqwest.
///
/// Uses non-blocking I/O with a pooled connection set kept warm between
/// requests, since asset loads tend to arrive in bursts against the same
/// few hosts.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with default configuration.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                TransportError::Request(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }
}

impl BlobTransport for ReqwestTransport {
    async fn fetch(&self, address: &str) -> Result<Vec<u8>, TransportError> {
        trace!(address = address, "HTTP GET starting");

        let response = match self.client.get(address).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    address = address,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(TransportError::Request(format!("request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(
                address = address,
                status = status.as_u16(),
                "HTTP error status"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                address: address.to_string(),
            });
        }

        match response.bytes().await {
            Ok(bytes) => {
                debug!(address = address, bytes = bytes.len(), "HTTP response body read");
                Ok(bytes.to_vec())
            }
            Err(e) => {
                warn!(address = address, error = %e, "failed to read response body");
                Err(TransportError::Request(format!(
                    "failed to read response: {}",
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Mock transport returning a fixed response.
    #[derive(Clone)]
    pub struct MockTransport {
        pub response: Result<Vec<u8>, TransportError>,
    }

    impl BlobTransport for MockTransport {
        async fn fetch(&self, _address: &str) -> Result<Vec<u8>, TransportError> {
            self.response.clone()
        }
    }

    #[tokio::test]
    async fn test_mock_transport_success() {
        let mock = MockTransport {
            response: Ok(vec![1, 2, 3, 4]),
        };

        let result = mock.fetch("https://cdn.example.com/a.png").await;
        assert_eq!(result.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_mock_transport_error() {
        let mock = MockTransport {
            response: Err(TransportError::Request("test error".to_string())),
        };

        let result = mock.fetch("https://cdn.example.com/a.png").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new().is_ok());
        assert!(ReqwestTransport::with_timeout(Duration::from_secs(5)).is_ok());
    }
}
