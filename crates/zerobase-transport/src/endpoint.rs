//! Endpoint addresses.
//!
//! Endpoints use a `scheme://address` syntax:
//!
//! - `tcp://host:port` where `host` may be `*` (all interfaces, bind only),
//!   a hostname such as `localhost`, or an IP literal (`[::1]` for IPv6).
//!   Port `0` asks the OS for an ephemeral port when binding.
//! - `inproc://name` for in-process delivery.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Endpoint parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Missing `scheme://` separator.
    #[error("Missing scheme in endpoint: {0}")]
    MissingScheme(String),

    /// Scheme is not known.
    #[error("Unsupported scheme '{scheme}' in endpoint: {endpoint}")]
    UnsupportedScheme { scheme: String, endpoint: String },

    /// Address part is malformed.
    #[error("Malformed address in endpoint {endpoint}: {reason}")]
    Malformed {
        endpoint: String,
        reason: &'static str,
    },
}

/// A parsed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP endpoint.
    Tcp {
        /// Host name, IP literal or `*`.
        host: String,
        /// Port number.
        port: u16,
    },
    /// In-process endpoint.
    Inproc {
        /// Registry name.
        name: String,
    },
}

impl Endpoint {
    /// Create a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create an in-process endpoint.
    #[must_use]
    pub fn inproc(name: impl Into<String>) -> Self {
        Endpoint::Inproc { name: name.into() }
    }

    /// Get the endpoint scheme.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Endpoint::Tcp { .. } => "tcp",
            Endpoint::Inproc { .. } => "inproc",
        }
    }

    /// Check whether this endpoint names the wildcard interface.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Endpoint::Tcp { host, .. } if host == "*")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{}]:{}", host, port)
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Inproc { name } => write!(f, "inproc://{}", name),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| EndpointError::Malformed {
            endpoint: s.to_string(),
            reason,
        };

        let (scheme, address) = s
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(s.to_string()))?;

        match scheme {
            "tcp" => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| malformed("expected host:port"))?;
                let host = host
                    .strip_prefix('[')
                    .and_then(|h| h.strip_suffix(']'))
                    .unwrap_or(host);
                if host.is_empty() {
                    return Err(malformed("empty host"));
                }
                if host.contains(':') && !address.starts_with('[') {
                    return Err(malformed("IPv6 hosts must be bracketed"));
                }
                let port = port.parse().map_err(|_| malformed("invalid port"))?;
                Ok(Endpoint::tcp(host, port))
            }
            "inproc" => {
                if address.is_empty() {
                    return Err(malformed("empty name"));
                }
                Ok(Endpoint::inproc(address))
            }
            other => Err(EndpointError::UnsupportedScheme {
                scheme: other.to_string(),
                endpoint: s.to_string(),
            }),
        }
    }
}
