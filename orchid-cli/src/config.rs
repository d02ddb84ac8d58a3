//! Configuration module
//!
//! Handles CLI configuration and builds the dispatcher commands go through.

use std::path::PathBuf;

use anyhow::{Context, Result};
use orchid_client::OrchidClient;
use orchid_core::domain::server::RemoteServer;
use orchid_core::domain::setup::Setup;
use orchid_engine::{Dispatcher, EngineConfig, LocalDispatcher, RemoteDispatcher};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Configuration directory
    pub root: PathBuf,
    /// Whether execution commands go to the remote server
    pub remote: bool,
}

impl Config {
    /// Engine settings from the environment, rooted at `--path`
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from_env().with_root(self.root.clone())
    }

    /// Loads jobs, machines and scripts from the configuration directory
    pub fn load_setup(&self) -> Result<Setup> {
        Setup::load(&self.root)
            .with_context(|| format!("Failed to load setup from {}", self.root.display()))
    }

    /// Builds the dispatcher selected by `--remote`
    pub async fn dispatcher(&self) -> Result<Dispatcher> {
        if self.remote {
            let server = RemoteServer::load(&self.root).context("Failed to load server config")?;
            tracing::debug!("Using remote server {}", server.base_url());
            return Ok(Dispatcher::Remote(RemoteDispatcher::new(
                OrchidClient::from_server(&server),
            )));
        }

        let engine_config = self.engine_config();
        engine_config
            .validate()
            .context("Invalid engine configuration")?;

        let setup = self.load_setup()?;
        let local = LocalDispatcher::open(engine_config, setup)
            .await
            .context("Failed to open execution store")?;

        Ok(Dispatcher::Local(local))
    }
}
