//! dynalloc.toml configuration parser.
//!
//! Every section and key is optional; missing values take the defaults
//! below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::SelectionPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DynallocConfig {
    pub server: ServerConfig,
    pub selection: SelectionConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Largest accepted request in bytes.
    pub max_message_size: usize,
    /// Per-poll timeout of the read and write loops.
    pub poll_interval_ms: u64,
    /// Transient write errors tolerated before a write is abandoned.
    pub write_retries: u32,
    /// Serve each connection on its own task instead of one at a time.
    pub concurrent: bool,
    /// Wait between attempts to bind a busy port. Zero fails on the first error.
    pub bind_retry_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 6820,
            max_message_size: 4096,
            poll_interval_ms: 100,
            write_retries: 10,
            concurrent: false,
            bind_retry_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bind_retry(&self) -> Duration {
        Duration::from_secs(self.bind_retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Sleep between mandatory-selection attempts.
    pub retry_interval_secs: u64,
    /// Job timeout used when a request carries no `timeout=`.
    pub default_job_timeout_secs: u64,
    /// Policy for app segments without `flag=`.
    pub default_app_flag: SelectionPolicy,
    /// Policy for the single-line `allocate` form without `flag=`.
    pub default_allocate_flag: SelectionPolicy,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 10,
            default_job_timeout_secs: 15,
            default_app_flag: SelectionPolicy::Mandatory,
            default_allocate_flag: SelectionPolicy::Optional,
        }
    }
}

impl SelectionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Inventory of the simulated resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cpus_per_task: u32,
    /// redb file for persisted node/job state. In-memory when absent.
    pub state_path: Option<PathBuf>,
    pub nodes: Vec<NodeGroupConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cpus_per_task: 1,
            state_path: None,
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroupConfig {
    /// Range expression, e.g. `node[1-16]`.
    pub names: String,
    pub cpus: u32,
}

impl DynallocConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: DynallocConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = DynallocConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 6820);
        assert_eq!(config.server.max_message_size, 4096);
        assert_eq!(config.server.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.server.write_retries, 10);
        assert!(!config.server.concurrent);
        assert_eq!(config.server.bind_retry(), Duration::from_secs(60));
        assert_eq!(config.selection.retry_interval(), Duration::from_secs(10));
        assert_eq!(config.selection.default_job_timeout_secs, 15);
        assert_eq!(config.selection.default_app_flag, SelectionPolicy::Mandatory);
        assert_eq!(config.selection.default_allocate_flag, SelectionPolicy::Optional);
        assert_eq!(config.cluster.cpus_per_task, 1);
        assert!(config.cluster.nodes.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[server]
port = 7000
concurrent = true
bind_retry_secs = 5

[selection]
retry_interval_secs = 2
default_app_flag = "optional"

[cluster]
cpus_per_task = 2

[[cluster.nodes]]
names = "node[1-4]"
cpus = 8

[[cluster.nodes]]
names = "gpu1"
cpus = 32
"#;
        let config = DynallocConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server.listen_addr(), "0.0.0.0:7000");
        assert!(config.server.concurrent);
        assert_eq!(config.server.bind_retry_secs, 5);
        assert_eq!(config.selection.retry_interval_secs, 2);
        assert_eq!(config.selection.default_app_flag, SelectionPolicy::Optional);
        assert_eq!(config.cluster.cpus_per_task, 2);
        assert_eq!(config.cluster.nodes.len(), 2);
        assert_eq!(config.cluster.nodes[0].names, "node[1-4]");
    }

    #[test]
    fn test_round_trip_toml() {
        let config = DynallocConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("retry_interval_secs"));
        let again = DynallocConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(again.server.port, config.server.port);
    }
}
