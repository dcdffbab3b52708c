//! Centralized coordinator configuration, loaded via the `config` crate
//! from environment variables (and, if present, a config file layered
//! underneath them).

use flowctl_transport::CredentialType;
use flowctl_flow::{ConnectionType, OsFamily};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Coordinator configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct CoordinatorConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Scheduler weights and worker budget.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Where flow YAML definitions are loaded from.
    pub flows: FlowsConfig,

    /// Fixed node inventory, provisioned here rather than through a
    /// database the engine itself owns.
    #[serde(default)]
    pub nodes: Vec<NodeSeed>,

    /// Group name to member-username table, seeding `GroupMembership`.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,

    /// Notification channel name to webhook URL.
    #[serde(default)]
    pub webhooks: HashMap<String, String>,

    /// Root directory under which per-execution artifact directories live.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    /// Per-action wall-clock timeout, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("/var/lib/flowctl/artifacts")
}

fn default_job_timeout_secs() -> u64 {
    3600
}

/// Scheduler weights (MUST sum to 100) and the worker pool size.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_worker_budget")]
    pub worker_budget: u32,
    #[serde(default = "default_flow_weight")]
    pub flow_execution_weight: u32,
    #[serde(default = "default_notification_weight")]
    pub notification_weight: u32,
}

fn default_worker_budget() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

fn default_flow_weight() -> u32 {
    70
}

fn default_notification_weight() -> u32 {
    30
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            worker_budget: default_worker_budget(),
            flow_execution_weight: default_flow_weight(),
            notification_weight: default_notification_weight(),
        }
    }
}

/// Directory of `*.yaml`/`*.yml` flow definitions, re-read on every cron-sync tick.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowsConfig {
    pub directory: String,
}

/// Authentication material for a seeded `NodeSeed`, handed to the
/// `CredentialVault` at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSeed {
    Password {
        password: String,
    },
    PrivateKey {
        private_key_pem: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl CredentialSeed {
    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Password { .. } => CredentialType::Password,
            Self::PrivateKey { .. } => CredentialType::PrivateKey,
        }
    }
}

/// A fixed node entry, provisioned into the `NodeResolver` and
/// `CredentialVault` once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSeed {
    pub namespace_id: String,
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub os_family: OsFamily,
    #[serde(default = "default_connection_type")]
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub credential: CredentialSeed,
    #[serde(default)]
    pub skip_cert_verification: bool,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connection_type() -> ConnectionType {
    ConnectionType::Ssh
}

impl CoordinatorConfig {
    /// Loads configuration from environment variables, using `__` as the
    /// nested-key separator (e.g. `QUEUE__WORKER_BUDGET`, `FLOWS__DIRECTORY`).
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_settings_default_weights_sum_to_100() {
        let settings = QueueSettings::default();
        assert_eq!(settings.flow_execution_weight + settings.notification_weight, 100);
    }
}
