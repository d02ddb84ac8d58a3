//! Server configuration

use std::path::Path;

use anyhow::{Context, Result};
use orchid_core::domain::server::RemoteServer;
use orchid_core::setup::SERVER_FILE;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: String,

    /// Shared secret required from clients; `None` disables the check
    pub secret: Option<String>,
}

impl ServerConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - ORCHID_BIND_ADDR (default: 0.0.0.0:3000)
    /// - ORCHID_SECRET (default: `Secret` of `<root>/server.json`, if present)
    pub fn from_env(root: &Path) -> Result<Self> {
        let bind_addr =
            std::env::var("ORCHID_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let secret = match std::env::var("ORCHID_SECRET") {
            Ok(secret) => Some(secret).filter(|s| !s.is_empty()),
            Err(_) => Self::secret_from_file(root)?,
        };

        Ok(Self { bind_addr, secret })
    }

    fn secret_from_file(root: &Path) -> Result<Option<String>> {
        if !root.join(SERVER_FILE).exists() {
            return Ok(None);
        }

        let server = RemoteServer::load(root)
            .with_context(|| format!("Failed to read {}", root.join(SERVER_FILE).display()))?;
        Ok(server.secret().map(str::to_string))
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        Ok(())
    }
}
