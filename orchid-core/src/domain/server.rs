//! Remote server entry
//!
//! Describes the peer Orchid server that remote commands are forwarded to.

use serde::{Deserialize, Serialize};

use super::setup::deserialize_port;

/// Connection settings for a remote Orchid server (`server.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteServer {
    pub address: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: String,
    /// Shared secret sent with every request; empty means none
    #[serde(default)]
    pub secret: String,
}

impl RemoteServer {
    /// Shared secret, if one is configured
    pub fn secret(&self) -> Option<&str> {
        let secret = self.secret.trim();
        if secret.is_empty() {
            None
        } else {
            Some(secret)
        }
    }

    /// Base URL of the server, defaulting to plain HTTP when no scheme is given
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}:{}", address, self.port)
        } else {
            format!("http://{}:{}", address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(address: &str, secret: &str) -> RemoteServer {
        RemoteServer {
            address: address.to_string(),
            port: "3000".to_string(),
            secret: secret.to_string(),
        }
    }

    #[test]
    fn test_base_url_adds_scheme() {
        assert_eq!(server("ci.local", "").base_url(), "http://ci.local:3000");
    }

    #[test]
    fn test_base_url_keeps_scheme() {
        assert_eq!(
            server("https://ci.example.com/", "").base_url(),
            "https://ci.example.com:3000"
        );
    }

    #[test]
    fn test_empty_secret_is_none() {
        assert_eq!(server("ci.local", "  ").secret(), None);
        assert_eq!(server("ci.local", "s3cret").secret(), Some("s3cret"));
    }
}
