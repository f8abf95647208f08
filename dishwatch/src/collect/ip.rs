//! Local and public address discovery.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::collect::AddressResolver;
use crate::error::{FetchError, Result};

/// Default plain-text public address lookup service.
pub const DEFAULT_PUBLIC_IP_URL: &str = "http://ip.42.pl/raw";

/// Resolves the local address used to reach a target.
///
/// Connecting a UDP socket selects a route and source address without sending
/// any packets, so the target does not need to be reachable.
#[derive(Debug, Clone)]
pub struct LocalAddress {
    target: String,
}

impl LocalAddress {
    /// Creates a resolver for the route to `target` (`host:port`).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl AddressResolver for LocalAddress {
    fn local_ip(&self) -> Option<String> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).ok()?;
        socket.connect(&self.target).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip().to_string())
    }
}

/// Looks up the address the internet sees, through a service that answers
/// with the caller's IP as plain text.
///
/// Behind Starlink CGNAT this is the carrier's address, not the dish's.
#[derive(Debug, Clone)]
pub struct PublicAddress {
    url: String,
    timeout: Duration,
}

impl Default for PublicAddress {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_IP_URL)
    }
}

impl PublicAddress {
    /// Creates a resolver querying `url`, with a 10 s timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetches the public address.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the request fails,
    /// [`FetchError::HttpStatus`] on a non-2xx answer and
    /// [`FetchError::InvalidAddress`] if the body is not an IP address.
    pub async fn fetch(&self) -> Result<IpAddr> {
        let http_error = |source| FetchError::Http {
            url: self.url.clone(),
            source,
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(http_error)?;
        let response = client.get(&self.url).send().await.map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.text().await.map_err(http_error)?;
        let body = body.trim();
        body.parse().map_err(|_| {
            FetchError::InvalidAddress {
                url: self.url.clone(),
                body: body.to_string(),
            }
            .into()
        })
    }
}
