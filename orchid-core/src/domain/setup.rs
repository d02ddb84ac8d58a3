//! Job, step and machine definitions
//!
//! These mirror the JSON files in the configuration directory, which use
//! PascalCase keys.

use serde::{Deserialize, Deserializer, Serialize};

/// Machine reference that runs a step on this host
pub const LOCAL_MACHINE: &str = "local";

/// Everything loaded from the configuration directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Setup {
    pub machines: Vec<Machine>,
    pub jobs: Vec<Job>,
    /// Script paths relative to the scripts directory
    pub scripts: Vec<String>,
}

impl Setup {
    /// Looks up a job by id
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Looks up a machine by id
    pub fn machine(&self, id: &str) -> Option<&Machine> {
        self.machines.iter().find(|machine| machine.id == id)
    }
}

/// Remote host reachable over ssh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Machine {
    pub id: String,
    pub address: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: String,
    pub user: String,
    /// Key file name relative to the keys directory
    pub private_key: String,
}

impl Machine {
    /// Port parsed as a TCP port number
    pub fn port_number(&self) -> Option<u16> {
        self.port.trim().parse().ok()
    }
}

/// Named, ordered list of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "Pipeline", alias = "Steps")]
    pub steps: Vec<Step>,
}

/// One script run on a target machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Step {
    /// Either [`LOCAL_MACHINE`] or a machine id
    pub machine: String,
    /// Script path relative to the scripts directory
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Step {
    pub fn is_local(&self) -> bool {
        self.machine == LOCAL_MACHINE
    }
}

/// Accepts ports written either as JSON strings or numbers
pub(crate) fn deserialize_port<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Text(String),
        Number(u64),
    }

    Ok(match PortRepr::deserialize(deserializer)? {
        PortRepr::Text(text) => text,
        PortRepr::Number(number) => number.to_string(),
    })
}
