//! Fleet operator: carries out expand and shrink verdicts

use chrono::Utc;
use elastic_core::{
    ContainerState, ElasticResult, HistoryDocument, NodeNaming, NodeTemplate, ProvisionedNode,
    ScalingConfig,
};
use elastic_provider::FleetGateway;
use elastic_store::{update, StateStore};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::lifecycle::ContainerLifecycle;

/// A node an action could not be completed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: String,
    pub error: String,
}

impl NodeFailure {
    fn new(node: &str, error: impl ToString) -> Self {
        Self {
            node: node.to_string(),
            error: error.to_string(),
        }
    }
}

/// Result of an expand request
#[derive(Debug, Clone, Default)]
pub struct ExpandOutcome {
    pub requested: u32,
    /// Requested count after clamping to `max_nodes`
    pub allowed: u32,
    /// Nodes running and marked Starting
    pub provisioned: Vec<ProvisionedNode>,
}

impl ExpandOutcome {
    pub fn at_capacity(&self) -> bool {
        self.requested > 0 && self.allowed == 0
    }
}

/// Result of a shrink request
#[derive(Debug, Clone, Default)]
pub struct ShrinkOutcome {
    pub requested: u32,
    /// Requested count after clamping to `min_nodes`
    pub allowed: u32,
    /// Nodes drained, destroyed and marked Stopped
    pub destroyed: Vec<String>,
    /// Nodes left in Stopping for a later cycle to finish
    pub failed: Vec<NodeFailure>,
}

impl ShrinkOutcome {
    pub fn at_floor(&self) -> bool {
        self.requested > 0 && self.allowed == 0
    }
}

/// Provisions and decommissions nodes
pub struct FleetOperator {
    gateway: Arc<dyn FleetGateway>,
    store: Arc<dyn StateStore>,
    lifecycle: ContainerLifecycle,
    scaling: ScalingConfig,
    naming: NodeNaming,
    template: NodeTemplate,
}

impl FleetOperator {
    pub fn new(
        gateway: Arc<dyn FleetGateway>,
        store: Arc<dyn StateStore>,
        lifecycle: ContainerLifecycle,
        scaling: ScalingConfig,
        naming: NodeNaming,
        template: NodeTemplate,
    ) -> Self {
        Self {
            gateway,
            store,
            lifecycle,
            scaling,
            naming,
            template,
        }
    }

    /// Add up to `count` nodes without exceeding `max_nodes`
    pub async fn expand(&self, count: u32) -> ElasticResult<ExpandOutcome> {
        let current = self.gateway.list_nodes().await?.len() as u32;
        let allowed = count.min(self.scaling.max_nodes.saturating_sub(current));
        let mut outcome = ExpandOutcome {
            requested: count,
            allowed,
            provisioned: Vec::new(),
        };

        if allowed == 0 {
            info!(
                current,
                max = self.scaling.max_nodes,
                "Fleet at maximum size, not expanding"
            );
            return Ok(outcome);
        }

        let now = Utc::now();
        let mut names: Vec<String> = Vec::with_capacity(allowed as usize);
        while names.len() < allowed as usize {
            let name = self.naming.generate(now);
            if !names.contains(&name) {
                names.push(name);
            }
        }

        info!(count = allowed, provider = self.gateway.name(), "Provisioning nodes");
        let accepted = self.gateway.create_nodes(&names, &self.template).await?;
        if accepted.len() < names.len() {
            warn!(
                requested = names.len(),
                accepted = accepted.len(),
                "Provider accepted fewer nodes than requested"
            );
        }

        let running = self.gateway.wait_until_running(&accepted).await?;
        if !running.is_empty() {
            update(self.store.as_ref(), |doc| {
                for node in &running {
                    doc.set_container_state(&node.name, ContainerState::Starting);
                }
            })
            .await?;
        }

        outcome.provisioned = running;
        Ok(outcome)
    }

    /// Remove up to `count` of the oldest nodes without going below `min_nodes`
    pub async fn shrink(&self, count: u32) -> ElasticResult<ShrinkOutcome> {
        let nodes = self.gateway.list_nodes().await?;
        let doc = self.store.load().await?;

        let eligible: Vec<ProvisionedNode> = nodes
            .into_iter()
            .filter(|n| !doc.container_state(&n.name).is_some_and(|s| s.is_leaving()))
            .collect();
        let current = eligible.len() as u32;
        let allowed = count.min(current.saturating_sub(self.scaling.min_nodes));

        if allowed == 0 {
            info!(
                current,
                min = self.scaling.min_nodes,
                "Fleet at minimum size, not shrinking"
            );
            return Ok(ShrinkOutcome {
                requested: count,
                allowed,
                ..ShrinkOutcome::default()
            });
        }

        let victims = oldest(eligible, allowed as usize);

        // Whole batch goes to Stopping before anything is signalled, so an
        // interrupted shrink leaves a clean set to resume.
        update(self.store.as_ref(), |doc| {
            for node in &victims {
                doc.set_container_state(&node.name, ContainerState::Stopping);
            }
        })
        .await?;

        let mut outcome = self.decommission(victims).await?;
        outcome.requested = count;
        outcome.allowed = allowed;
        Ok(outcome)
    }

    /// Finish shrinks a previous run left in Stopping.
    ///
    /// Listed Stopping nodes are drained and destroyed; Stopping records
    /// whose VM is already gone are marked Stopped.
    pub async fn resume_pending(
        &self,
        nodes: &[ProvisionedNode],
        doc: &HistoryDocument,
    ) -> ElasticResult<ShrinkOutcome> {
        let stopping: HashSet<String> = doc
            .nodes_in(ContainerState::Stopping)
            .into_iter()
            .collect();
        if stopping.is_empty() {
            return Ok(ShrinkOutcome::default());
        }

        let listed: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let vanished: Vec<String> = stopping
            .iter()
            .filter(|name| !listed.contains(name.as_str()))
            .cloned()
            .collect();
        if !vanished.is_empty() {
            update(self.store.as_ref(), |doc| {
                for name in &vanished {
                    doc.set_container_state(name, ContainerState::Stopped);
                }
            })
            .await?;
        }

        let victims: Vec<ProvisionedNode> = nodes
            .iter()
            .filter(|n| stopping.contains(&n.name))
            .cloned()
            .collect();
        if victims.is_empty() {
            return Ok(ShrinkOutcome::default());
        }

        info!(count = victims.len(), "Resuming interrupted shrink");
        self.decommission(victims).await
    }

    /// Signal, drain, destroy and record a batch of Stopping nodes
    async fn decommission(&self, victims: Vec<ProvisionedNode>) -> ElasticResult<ShrinkOutcome> {
        let mut outcome = ShrinkOutcome::default();
        let mut signalled = Vec::new();

        for node in &victims {
            let Some(address) = node.address.as_deref() else {
                warn!(node = %node.name, "Node has no address, cannot drain it");
                outcome
                    .failed
                    .push(NodeFailure::new(&node.name, "node has no address"));
                continue;
            };
            match self.lifecycle.stop(&node.name, address).await {
                Ok(()) => signalled.push((node.name.as_str(), address)),
                Err(e) => {
                    if e.is_transient() {
                        warn!(node = %node.name, "Node unreachable, will retry the stop next cycle");
                    } else {
                        warn!(node = %node.name, error = %e, "Failed to stop workload");
                    }
                    outcome.failed.push(NodeFailure::new(&node.name, e));
                }
            }
        }

        let drains = join_all(
            signalled
                .iter()
                .map(|(name, address)| self.lifecycle.wait_for_drain(name, address)),
        )
        .await;

        let mut drained = Vec::new();
        for ((name, _), result) in signalled.iter().zip(drains) {
            match result {
                Ok(()) => drained.push(name.to_string()),
                Err(e) => {
                    warn!(node = %name, error = %e, "Workload did not drain, keeping node");
                    outcome.failed.push(NodeFailure::new(name, e));
                }
            }
        }

        if drained.is_empty() {
            return Ok(outcome);
        }

        info!(count = drained.len(), "Destroying drained nodes");
        let destroyed = self.gateway.destroy_nodes(&drained).await?;
        for name in &drained {
            if !destroyed.contains(name) {
                outcome
                    .failed
                    .push(NodeFailure::new(name, "destroy not confirmed by provider"));
            }
        }

        if !destroyed.is_empty() {
            update(self.store.as_ref(), |doc| {
                for name in &destroyed {
                    doc.set_container_state(name, ContainerState::Stopped);
                }
            })
            .await?;
        }

        outcome.destroyed = destroyed;
        Ok(outcome)
    }
}

/// The `count` oldest nodes; equal timestamps keep listing order
fn oldest(mut nodes: Vec<ProvisionedNode>, count: usize) -> Vec<ProvisionedNode> {
    nodes.sort_by_key(|n| n.created_at);
    nodes.truncate(count);
    nodes
}
