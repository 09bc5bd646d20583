//! One control-loop cycle
//!
//! list → resume interrupted shrinks → probe → decide → persist → execute.
//! History is saved before the verdict runs; a store failure ends the cycle
//! with nothing executed.

use elastic_core::{
    ContainerState, ElasticConfig, ElasticError, ElasticResult, HistoryDocument, NodeNaming,
    NodeRecord, ProvisionedNode, ScalingConfig, ScalingVerdict, UtilizationState,
};
use elastic_network::{HealthProbe, NodeSample, RemoteExec};
use elastic_provider::FleetGateway;
use elastic_store::traits::UPDATE_ATTEMPTS;
use elastic_store::{update, StateStore};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{compute_verdict, Observation, Snapshot};
use crate::lifecycle::ContainerLifecycle;
use crate::operator::{ExpandOutcome, FleetOperator, ShrinkOutcome};

/// What the cycle did about its verdict
#[derive(Debug, Clone)]
pub enum CycleAction {
    None,
    Expanded(ExpandOutcome),
    Shrunk(ShrinkOutcome),
}

/// Outcome of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Every listed node as persisted before the verdict ran
    pub nodes: Vec<NodeRecord>,
    pub verdict: ScalingVerdict,
    pub action: CycleAction,
    /// Interrupted shrink finished at the start of the cycle
    pub resumed: ShrinkOutcome,
}

/// Drives the fleet from observation to action
pub struct Autoscaler {
    gateway: Arc<dyn FleetGateway>,
    store: Arc<dyn StateStore>,
    probe: HealthProbe,
    operator: FleetOperator,
    scaling: ScalingConfig,
}

impl Autoscaler {
    pub fn new(
        gateway: Arc<dyn FleetGateway>,
        exec: Arc<dyn RemoteExec>,
        store: Arc<dyn StateStore>,
        config: &ElasticConfig,
    ) -> Self {
        let probe = HealthProbe::new(exec, config.probe.clone());
        let lifecycle = ContainerLifecycle::new(probe.clone(), config.lifecycle.clone());
        let operator = FleetOperator::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            lifecycle,
            config.scaling,
            NodeNaming::new(config.provider.name_prefix.clone()),
            config.provider.template(),
        );

        Self {
            gateway,
            store,
            probe,
            operator,
            scaling: config.scaling,
        }
    }

    pub fn operator(&self) -> &FleetOperator {
        &self.operator
    }

    /// Run one full cycle
    pub async fn run_cycle(&self) -> ElasticResult<CycleReport> {
        let mut nodes = self.gateway.list_nodes().await?;
        let doc = self.store.load().await?;

        let resumed = self.operator.resume_pending(&nodes, &doc).await?;
        if !resumed.destroyed.is_empty() {
            nodes.retain(|n| !resumed.destroyed.contains(&n.name));
        }

        let doc = self.store.load().await?;
        let samples = self.survey(&nodes, &doc).await;
        let listed: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();

        let mut doc = doc;
        let mut attempt = 0;
        let (saved, evaluation) = loop {
            attempt += 1;

            for (name, sample) in &samples {
                if let Some(sample) = sample {
                    ContainerLifecycle::reconcile(&mut doc, name, sample);
                }
            }

            let snapshot = snapshot(&nodes, &samples, &doc);
            let mut evaluation = compute_verdict(&snapshot, &doc, &self.scaling);
            let collected = evaluation.history.collect_garbage(&listed);
            if !collected.is_empty() {
                debug!(nodes = ?collected, "Dropped records of vanished nodes");
            }

            match self.store.save(&evaluation.history).await {
                Ok(saved) => break (saved, evaluation),
                Err(ElasticError::Conflict { expected, found })
                    if attempt < UPDATE_ATTEMPTS =>
                {
                    warn!(expected, found, attempt, "History changed underneath, re-evaluating");
                    doc = self.store.load().await?;
                }
                Err(e) => return Err(e),
            }
        };

        let scored: HashMap<&str, UtilizationState> = evaluation
            .assessments
            .iter()
            .map(|a| (a.name.as_str(), a.state))
            .collect();
        let records = nodes
            .iter()
            .map(|n| record(n, scored.get(n.name.as_str()).copied(), &saved))
            .collect();

        let verdict = evaluation.verdict;
        info!(
            verdict = %verdict,
            candidates = evaluation.shrink_candidates.len(),
            "Cycle verdict"
        );

        let action = match verdict {
            ScalingVerdict::DoNothing => CycleAction::None,
            ScalingVerdict::Expand(n) => CycleAction::Expanded(self.operator.expand(n).await?),
            ScalingVerdict::Shrink(n) => CycleAction::Shrunk(self.operator.shrink(n).await?),
        };

        Ok(CycleReport {
            nodes: records,
            verdict,
            action,
            resumed,
        })
    }

    /// Probe the fleet and reconcile container states without scoring.
    ///
    /// Utilization is what the probe sees now; sticky counts are the stored
    /// ones when the state matches.
    pub async fn dump_state(&self) -> ElasticResult<Vec<NodeRecord>> {
        let nodes = self.gateway.list_nodes().await?;
        let doc = self.store.load().await?;
        let samples = self.survey(&nodes, &doc).await;

        let saved = update(self.store.as_ref(), |doc| {
            for (name, sample) in &samples {
                if let Some(sample) = sample {
                    ContainerLifecycle::reconcile(doc, name, sample);
                }
            }
        })
        .await?;

        Ok(nodes
            .iter()
            .zip(&samples)
            .map(|(node, (_, sample))| {
                let state = sample.map(|s| {
                    let quarantined =
                        saved.container_state(&node.name) == Some(ContainerState::Starting);
                    Observation::new(node.name.clone(), s.busy, quarantined).classify()
                });
                let mut rec = record(node, state, &saved);
                if rec.utilization.is_some()
                    && rec.utilization != saved.utilization(&node.name).map(|e| e.state)
                {
                    rec.sticky_count = 0;
                }
                rec
            })
            .collect())
    }

    /// Probe every node that is not leaving, concurrently.
    ///
    /// Returns one entry per listed node in listing order; leaving and
    /// unreachable nodes carry `None`.
    async fn survey(
        &self,
        nodes: &[ProvisionedNode],
        doc: &HistoryDocument,
    ) -> Vec<(String, Option<NodeSample>)> {
        let probes = nodes.iter().map(|node| async move {
            let leaving = doc
                .container_state(&node.name)
                .is_some_and(|s| s.is_leaving());
            let sample = match node.address.as_deref() {
                _ if leaving => None,
                Some(address) => self.probe.sample(address).await,
                None => {
                    debug!(node = %node.name, "Node has no address yet");
                    None
                }
            };
            (node.name.clone(), sample)
        });
        join_all(probes).await
    }
}

fn snapshot(
    nodes: &[ProvisionedNode],
    samples: &[(String, Option<NodeSample>)],
    doc: &HistoryDocument,
) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for (node, (_, sample)) in nodes.iter().zip(samples) {
        match sample {
            Some(s) => {
                let quarantined = doc.container_state(&node.name) == Some(ContainerState::Starting);
                snapshot
                    .observations
                    .push(Observation::new(node.name.clone(), s.busy, quarantined));
            }
            None => snapshot.unreachable.push(node.name.clone()),
        }
    }
    snapshot
}

fn record(
    node: &ProvisionedNode,
    utilization: Option<UtilizationState>,
    doc: &HistoryDocument,
) -> NodeRecord {
    NodeRecord {
        name: node.name.clone(),
        address: node.address.clone(),
        utilization,
        sticky_count: doc.utilization(&node.name).map_or(0, |e| e.sticky_count),
        container_state: doc.container_state(&node.name),
    }
}
