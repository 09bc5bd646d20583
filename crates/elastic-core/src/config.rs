//! Configuration types for elastic

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::node::NodeTemplate;
use crate::{ElasticError, ElasticResult};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    /// Scaling bounds and sensitivities
    pub scaling: ScalingConfig,
    /// Cloud provider configuration
    pub provider: ProviderConfig,
    /// Remote shell configuration
    pub ssh: SshConfig,
    /// Utilization probe configuration
    pub probe: ProbeConfig,
    /// Container lifecycle configuration
    pub lifecycle: LifecycleConfig,
    /// State store configuration
    pub state: StateConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ElasticConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> ElasticResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ElasticError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> ElasticResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override scaling settings from environment-style variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ElasticResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> ElasticResult<Option<u32>> {
            match lookup(key) {
                Some(raw) => raw.trim().parse::<u32>().map(Some).map_err(|e| {
                    ElasticError::Config(format!("Invalid value for {}: {:?} ({})", key, raw, e))
                }),
                None => Ok(None),
            }
        };

        if let Some(v) = read("ELASTIC_MIN_NODES")? {
            self.scaling.min_nodes = v;
        }
        if let Some(v) = read("ELASTIC_MAX_NODES")? {
            self.scaling.max_nodes = v;
        }
        if let Some(v) = read("ELASTIC_EXPAND_SENSITIVITY")? {
            self.scaling.expand_sensitivity = v;
        }
        if let Some(v) = read("ELASTIC_SHRINK_SENSITIVITY")? {
            self.scaling.shrink_sensitivity = v;
        }
        Ok(())
    }

    /// Check the configuration before anything touches the fleet
    pub fn validate(&self) -> ElasticResult<()> {
        self.scaling.validate()?;
        if self.provider.name_prefix.is_empty()
            || !self
                .provider
                .name_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ElasticError::Config(format!(
                "provider.name_prefix must be lowercase alphanumeric, got {:?}",
                self.provider.name_prefix
            )));
        }
        if self.lifecycle.drain_poll_interval_ms == 0 {
            return Err(ElasticError::Config(
                "lifecycle.drain_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Scaling bounds and hysteresis sensitivities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Fleet never shrinks below this many nodes
    pub min_nodes: u32,
    /// Fleet never grows above this many nodes
    pub max_nodes: u32,
    /// Consecutive fleet-wide busy cycles required before growing
    pub expand_sensitivity: u32,
    /// Consecutive idle cycles required before a node is a shrink candidate
    pub shrink_sensitivity: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_nodes: 1,
            max_nodes: 3,
            expand_sensitivity: 1,
            shrink_sensitivity: 3,
        }
    }
}

impl ScalingConfig {
    pub fn validate(&self) -> ElasticResult<()> {
        if self.max_nodes == 0 {
            return Err(ElasticError::Config(
                "scaling.max_nodes must be at least 1".to_string(),
            ));
        }
        if self.min_nodes > self.max_nodes {
            return Err(ElasticError::Config(format!(
                "scaling.min_nodes ({}) exceeds scaling.max_nodes ({})",
                self.min_nodes, self.max_nodes
            )));
        }
        if self.expand_sensitivity == 0 || self.shrink_sensitivity == 0 {
            return Err(ElasticError::Config(
                "scaling sensitivities must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Compute Engine
    Gce,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Gce => write!(f, "gce"),
        }
    }
}

/// Cloud provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which gateway implementation to use
    pub kind: ProviderKind,
    /// Cloud project identifier
    pub project: String,
    /// Zone (datacenter) nodes are created in
    pub zone: String,
    /// Machine type for new nodes
    pub machine_type: String,
    /// Boot image for new nodes
    pub image: String,
    /// Attach a GPU accelerator to new nodes
    pub use_gpus: bool,
    /// Accelerator type used when `use_gpus` is set
    pub accelerator_type: String,
    /// Accelerator count used when `use_gpus` is set
    pub accelerator_count: u32,
    /// Service account attached to new nodes
    pub service_account_email: Option<String>,
    /// Environment variable holding the API access token
    pub token_env: String,
    /// Prefix of every managed node name
    pub name_prefix: String,
    /// Poll interval while waiting on provider operations
    pub poll_interval_secs: u64,
    /// Upper bound on waiting for a node to run or disappear
    pub operation_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Gce,
            project: String::new(),
            zone: "us-west1-a".to_string(),
            machine_type: "n1-standard-1".to_string(),
            image: String::new(),
            use_gpus: false,
            accelerator_type: "nvidia-tesla-p100".to_string(),
            accelerator_count: 1,
            service_account_email: None,
            token_env: "GCE_ACCESS_TOKEN".to_string(),
            name_prefix: "gpu".to_string(),
            poll_interval_secs: 2,
            operation_timeout_secs: 600,
        }
    }
}

impl ProviderConfig {
    /// Size/image template handed to the gateway when creating nodes
    pub fn template(&self) -> NodeTemplate {
        NodeTemplate {
            machine_type: self.machine_type.clone(),
            image: self.image.clone(),
            accelerator: if self.use_gpus {
                Some((self.accelerator_type.clone(), self.accelerator_count))
            } else {
                None
            },
            service_account_email: self.service_account_email.clone(),
        }
    }
}

/// Remote shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Path to the ssh client binary
    pub binary: PathBuf,
    /// Login user on the nodes
    pub user: String,
    /// Private key file (ssh default when unset)
    pub identity_file: Option<PathBuf>,
    /// SSH port
    pub port: u16,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Upper bound on a single remote command
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            user: "ubuntu".to_string(),
            identity_file: None,
            port: 22,
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
        }
    }
}

/// Utilization probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Command whose numeric output measures the workload marker
    pub utilization_command: String,
    /// Node is busy when the marker value exceeds this
    pub busy_threshold: u64,
    /// Command listing running workload containers, one per line
    pub workload_command: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            utilization_command: "ls -la /tmp/codalab | wc -l".to_string(),
            busy_threshold: 4,
            workload_command: "sudo docker ps --quiet".to_string(),
        }
    }
}

/// Container lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Name of the workload container on each node
    pub container_name: String,
    /// Grace period handed to the graceful stop
    pub stop_grace_secs: u64,
    /// Interval between drain polls
    pub drain_poll_interval_ms: u64,
    /// Give up on a node whose workload has not drained after this long
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            container_name: "compute_worker".to_string(),
            stop_grace_secs: 10,
            drain_poll_interval_ms: 500,
            drain_timeout_secs: 3600,
        }
    }
}

/// State store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON document on local disk
    File,
    /// Process memory, lost on exit
    Memory,
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// Path of the history document for the file backend
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            path: PathBuf::from(".states/history.json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
