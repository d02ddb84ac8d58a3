//! Engine configuration
//!
//! Defines where the engine keeps its state and how steps are launched:
//! configuration root, shell and ssh programs, timeouts and the follow
//! interval used by output readers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use orchid_core::setup::{KEYS_DIR, SCRIPTS_DIR};
use uuid::Uuid;

/// Directory below the root holding one output file per execution
pub const LOGS_DIR: &str = "logs";

/// Journal of execution status records below the root
pub const JOURNAL_FILE: &str = "executions.jsonl";

/// Engine configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (laptop vs CI server, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Configuration root (jobs, machines, scripts, keys, executions)
    pub root: PathBuf,

    /// Shell used to run local scripts
    pub shell: String,

    /// Program used to reach remote machines
    pub ssh_program: String,

    /// Maximum time a single step may run; `None` waits indefinitely
    pub step_timeout: Option<Duration>,

    /// Maximum time to wait for a remote machine to accept a connection
    pub connect_timeout: Duration,

    /// How often readers re-check an output file written by another process
    pub poll_interval: Duration,

    /// Journal lines per live record tolerated before the journal is compacted
    pub compaction_factor: usize,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shell: "/bin/bash".to_string(),
            ssh_program: "ssh".to_string(),
            step_timeout: None,
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            compaction_factor: 4,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - ORCHID_ROOT (default: ci)
    /// - ORCHID_SHELL (default: /bin/bash)
    /// - ORCHID_SSH (default: ssh)
    /// - ORCHID_STEP_TIMEOUT (seconds, default: none)
    /// - ORCHID_CONNECT_TIMEOUT (seconds, default: 5)
    /// - ORCHID_POLL_INTERVAL_MS (milliseconds, default: 250)
    pub fn from_env() -> Self {
        let root = std::env::var("ORCHID_ROOT").unwrap_or_else(|_| "ci".to_string());
        let mut config = Self::new(root);

        if let Ok(shell) = std::env::var("ORCHID_SHELL") {
            config.shell = shell;
        }

        if let Ok(ssh) = std::env::var("ORCHID_SSH") {
            config.ssh_program = ssh;
        }

        config.step_timeout = std::env::var("ORCHID_STEP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        if let Some(timeout) = std::env::var("ORCHID_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.connect_timeout = Duration::from_secs(timeout);
        }

        if let Some(interval) = std::env::var("ORCHID_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.poll_interval = Duration::from_millis(interval);
        }

        config
    }

    /// Replaces the configuration root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root.as_os_str().is_empty() {
            anyhow::bail!("root cannot be empty");
        }

        if self.shell.is_empty() {
            anyhow::bail!("shell cannot be empty");
        }

        if self.ssh_program.is_empty() {
            anyhow::bail!("ssh_program cannot be empty");
        }

        if self.step_timeout.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("step_timeout must be greater than 0");
        }

        if self.connect_timeout.is_zero() {
            anyhow::bail!("connect_timeout must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.compaction_factor < 2 {
            anyhow::bail!("compaction_factor must be at least 2");
        }

        Ok(())
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(SCRIPTS_DIR)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }
}

pub(crate) fn output_path(logs_dir: &Path, execution_id: Uuid) -> PathBuf {
    logs_dir.join(execution_id.to_string())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("ci")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.root, PathBuf::from("ci"));
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.step_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.shell = String::new();
        assert!(config.validate().is_err());
        config.shell = "/bin/sh".to_string();

        config.step_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());
        config.step_timeout = Some(Duration::from_secs(60));

        config.compaction_factor = 1;
        assert!(config.validate().is_err());
        config.compaction_factor = 4;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let config = EngineConfig::new("/srv/orchid");
        let id = Uuid::new_v4();

        assert_eq!(config.scripts_dir(), PathBuf::from("/srv/orchid/scripts"));
        assert_eq!(config.keys_dir(), PathBuf::from("/srv/orchid/keys"));
        assert_eq!(config.journal_path(), PathBuf::from("/srv/orchid/executions.jsonl"));
        assert_eq!(
            output_path(&config.logs_dir(), id),
            PathBuf::from(format!("/srv/orchid/logs/{}", id))
        );
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default().with_root("/tmp/orchid");

        assert_eq!(config.root, PathBuf::from("/tmp/orchid"));
        assert_eq!(config.journal_path(), PathBuf::from("/tmp/orchid/executions.jsonl"));
    }
}
