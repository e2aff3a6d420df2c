//! Controller endpoint addressing.

use std::fmt;

use url::Url;

use crate::error::{LinkError, LinkResult};

/// A controller endpoint: a `ws://` or `wss://` URL plus TLS options.
///
/// The endpoint is immutable once a connection attempt starts; pass a new
/// value to the next `connect` call to move the client elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    danger_accept_invalid_certs: bool,
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// Only `ws` and `wss` schemes are accepted, and a host is required.
    pub fn parse(input: &str) -> LinkResult<Self> {
        let url = Url::parse(input)
            .map_err(|e| LinkError::Endpoint(format!("{input}: {e}")))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(LinkError::Endpoint(format!(
                    "unsupported scheme '{other}' (expected ws or wss)"
                )));
            }
        }

        if url.host_str().is_none() {
            return Err(LinkError::Endpoint(format!("{input}: missing host")));
        }

        Ok(Self {
            url,
            danger_accept_invalid_certs: false,
        })
    }

    /// Skip TLS certificate verification (DANGEROUS - development only).
    ///
    /// Only meaningful for `wss` endpoints. This makes the connection
    /// vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Whether certificate verification is disabled.
    pub fn accepts_invalid_certs(&self) -> bool {
        self.danger_accept_invalid_certs
    }

    /// Whether this endpoint uses TLS (`wss`).
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// The endpoint URL as a string.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
