//! Node naming, utilization and container state types

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp layout embedded in every managed node name
pub const NODE_TIME_FORMAT: &str = "%m-%d-%Y-%H-%M-%S";

const TIMESTAMP_LEN: usize = 19;
const MAX_SUFFIX_LEN: usize = 8;

/// Generates and parses managed node names.
///
/// Names look like `gpu-03-14-2019-10-00-00-9f2c`: prefix, creation time,
/// and a short random suffix so two nodes created in the same second never
/// share a name. Names without the suffix are still accepted. Anything else
/// is a node this system does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNaming {
    prefix: String,
}

impl NodeNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Generate a fresh node name for the given creation time
    pub fn generate(&self, now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            self.prefix,
            now.format(NODE_TIME_FORMAT),
            &suffix[..4]
        )
    }

    /// Creation time embedded in `name`, or `None` for foreign nodes
    pub fn created_at(&self, name: &str) -> Option<NaiveDateTime> {
        let rest = name.strip_prefix(self.prefix.as_str())?.strip_prefix('-')?;
        if !rest.is_char_boundary(TIMESTAMP_LEN) || rest.len() < TIMESTAMP_LEN {
            return None;
        }
        let (stamp, tail) = rest.split_at(TIMESTAMP_LEN);
        if !tail.is_empty() {
            let suffix = tail.strip_prefix('-')?;
            let valid = !suffix.is_empty()
                && suffix.len() <= MAX_SUFFIX_LEN
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            if !valid {
                return None;
            }
        }
        NaiveDateTime::parse_from_str(stamp, NODE_TIME_FORMAT).ok()
    }

    /// Whether `name` belongs to the managed fleet
    pub fn is_managed(&self, name: &str) -> bool {
        self.created_at(name).is_some()
    }
}

/// A node as reported by the fleet gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedNode {
    /// Unique node name
    pub name: String,
    /// First reachable network address, if one has been assigned yet
    pub address: Option<String>,
    /// Creation time parsed from the name
    pub created_at: NaiveDateTime,
}

/// Size and image of new nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub machine_type: String,
    pub image: String,
    /// Accelerator type and count, if nodes need a GPU
    pub accelerator: Option<(String, u32)>,
    pub service_account_email: Option<String>,
}

/// Utilization classification of a node for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum UtilizationState {
    /// Workload marker present
    Busy,
    /// No work on the node
    NotBusy,
    /// Freshly started, workload not yet confirmed; excluded from tallies
    Managed,
}

impl std::fmt::Display for UtilizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UtilizationState::Busy => write!(f, "BUSY"),
            UtilizationState::NotBusy => write!(f, "NOT-BUSY"),
            UtilizationState::Managed => write!(f, "MANAGED"),
        }
    }
}

/// Lifecycle of the workload container on a node.
///
/// A node with no record at all is in the implicit "none" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerState {
    /// Node provisioned, workload not seen yet
    Starting,
    /// Workload seen running
    Running,
    /// Selected for shrink, draining
    Stopping,
    /// Drained and destroyed
    Stopped,
}

impl ContainerState {
    /// Nodes in these states are leaving the fleet and are never scored
    pub fn is_leaving(self) -> bool {
        matches!(self, ContainerState::Stopping | ContainerState::Stopped)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Starting => write!(f, "STARTING"),
            ContainerState::Running => write!(f, "RUNNING"),
            ContainerState::Stopping => write!(f, "STOPPING"),
            ContainerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Everything known about a live node after a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub address: Option<String>,
    /// `None` when the node could not be probed this cycle
    pub utilization: Option<UtilizationState>,
    pub sticky_count: u32,
    pub container_state: Option<ContainerState>,
}
