//! Container lifecycle on fleet nodes
//!
//! `None -> Starting -> Running -> Stopping -> Stopped`. Provisioning marks a
//! node Starting; seeing its workload moves it (or an unrecorded node) to
//! Running. Shrinking marks it Stopping, stops the workload gracefully and
//! waits for it to drain before the VM is destroyed and the node is marked
//! Stopped.

use elastic_core::{ContainerState, ElasticError, ElasticResult, HistoryDocument, LifecycleConfig};
use elastic_network::{HealthProbe, NodeSample, RemoteExec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stops workloads and waits for them to drain
#[derive(Clone)]
pub struct ContainerLifecycle {
    exec: Arc<dyn RemoteExec>,
    probe: HealthProbe,
    config: LifecycleConfig,
}

impl ContainerLifecycle {
    pub fn new(probe: HealthProbe, config: LifecycleConfig) -> Self {
        Self {
            exec: probe.transport(),
            probe,
            config,
        }
    }

    fn stop_command(&self) -> String {
        format!(
            "sudo docker stop -t {} {}",
            self.config.stop_grace_secs, self.config.container_name
        )
    }

    /// Ask the workload on a node to stop gracefully
    pub async fn stop(&self, node: &str, address: &str) -> ElasticResult<()> {
        info!(node = node, address = address, "Stopping workload");

        let output = self.exec.run(address, &self.stop_command()).await?;
        if !output.success() {
            // Usually "No such container": nothing left to stop, the drain wait confirms it
            warn!(
                node = node,
                status = output.status,
                stderr = %output.stderr.trim(),
                "Graceful stop did not succeed"
            );
        }
        Ok(())
    }

    /// Poll until no workload is left on the node.
    ///
    /// Unreachable polls are retried; the whole wait is bounded by
    /// `drain_timeout_secs`.
    pub async fn wait_for_drain(&self, node: &str, address: &str) -> ElasticResult<()> {
        let interval = Duration::from_millis(self.config.drain_poll_interval_ms);
        let limit = Duration::from_secs(self.config.drain_timeout_secs);

        let drain = async {
            loop {
                match self.probe.workload_count(address).await {
                    Ok(0) => {
                        info!(node = node, "Workload drained");
                        return;
                    }
                    Ok(running) => debug!(node = node, running, "Workload still stopping"),
                    Err(e) => warn!(node = node, error = %e, "Drain poll failed"),
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::time::timeout(limit, drain)
            .await
            .map_err(|_| ElasticError::DrainTimeout {
                node: node.to_string(),
                secs: self.config.drain_timeout_secs,
            })
    }

    /// Advance a node's container state from what a probe saw.
    ///
    /// Returns the new state when it changed.
    pub fn reconcile(
        doc: &mut HistoryDocument,
        node: &str,
        sample: &NodeSample,
    ) -> Option<ContainerState> {
        if sample.workloads == 0 {
            return None;
        }
        match doc.container_state(node) {
            None | Some(ContainerState::Starting) => {
                doc.set_container_state(node, ContainerState::Running);
                debug!(node = node, "Workload running");
                Some(ContainerState::Running)
            }
            Some(_) => None,
        }
    }
}
