//! The persisted history document

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::node::{ContainerState, UtilizationState};

/// Utilization history of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationEntry {
    /// Classification at the last observed cycle
    pub state: UtilizationState,
    /// Consecutive cycles the node has held `state`
    pub sticky_count: u32,
}

/// Document read and rewritten wholesale by every cycle.
///
/// `version` is bumped by the store on each successful save; a save whose
/// base version is stale is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub version: u64,
    /// Node name to utilization history
    #[serde(default)]
    pub nodes: BTreeMap<String, UtilizationEntry>,
    /// Node name to container lifecycle state
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerState>,
}

impl HistoryDocument {
    pub fn utilization(&self, name: &str) -> Option<&UtilizationEntry> {
        self.nodes.get(name)
    }

    pub fn container_state(&self, name: &str) -> Option<ContainerState> {
        self.containers.get(name).copied()
    }

    pub fn set_container_state(&mut self, name: &str, state: ContainerState) {
        self.containers.insert(name.to_string(), state);
    }

    /// Names whose container state equals `state`
    pub fn nodes_in(&self, state: ContainerState) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drop container records whose VM is no longer listed.
    ///
    /// `Stopping` records are kept for the resumed shrink to settle. Anything
    /// else belongs to a VM that is gone, whether we destroyed it or not.
    /// Returns the names removed.
    pub fn collect_garbage(&mut self, listed: &HashSet<&str>) -> Vec<String> {
        let stale: Vec<String> = self
            .containers
            .iter()
            .filter(|(name, state)| {
                **state != ContainerState::Stopping && !listed.contains(name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            self.containers.remove(name);
            self.nodes.remove(name);
        }
        stale
    }
}
