//! Cluster endpoint identity.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// An endpoint a node can be reached at: address, port, and the TLS name to
/// verify against when TLS is configured.
///
/// Hosts are immutable values; they come from client configuration or peers
/// responses and are compared by all three components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub port: u16,
    pub tls_name: Option<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: None,
        }
    }

    pub fn with_tls_name(name: impl Into<String>, port: u16, tls_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: Some(tls_name.into()),
        }
    }

    /// Resolves the host to socket addresses via the system resolver.
    ///
    /// # Errors
    ///
    /// Returns the resolver error when the name does not resolve.
    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((self.name.as_str(), self.port)).await?;
        Ok(addrs.collect())
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_name_colon_port() {
        assert_eq!(Host::new("10.0.0.1", 3000).to_string(), "10.0.0.1:3000");
    }

    #[test]
    fn equality_includes_tls_name() {
        let plain = Host::new("db.example.com", 3000);
        let tls = Host::with_tls_name("db.example.com", 3000, "db");
        assert_ne!(plain, tls);
        assert_eq!(plain, Host::new("db.example.com", 3000));
    }

    #[tokio::test]
    async fn resolves_loopback() {
        let host = Host::new("127.0.0.1", 3000);
        let addrs = host.resolve().await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 3000));
    }
}
