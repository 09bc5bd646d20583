//! Utilization probing for fleet nodes

use elastic_core::{ElasticError, ElasticResult, ProbeConfig};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::transport::RemoteExec;

/// What one probe of a node found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSample {
    /// Workload marker present
    pub busy: bool,
    /// Number of workload containers running
    pub workloads: u32,
}

/// Inspects nodes over a [`RemoteExec`] transport
#[derive(Clone)]
pub struct HealthProbe {
    exec: Arc<dyn RemoteExec>,
    config: ProbeConfig,
}

impl HealthProbe {
    pub fn new(exec: Arc<dyn RemoteExec>, config: ProbeConfig) -> Self {
        Self { exec, config }
    }

    /// The transport this probe runs its commands over
    pub fn transport(&self) -> Arc<dyn RemoteExec> {
        Arc::clone(&self.exec)
    }

    /// Whether the workload marker on the node exceeds the busy threshold
    pub async fn utilization(&self, address: &str) -> ElasticResult<bool> {
        let output = self
            .exec
            .run(address, &self.config.utilization_command)
            .await?;

        let value = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .and_then(|l| l.parse::<u64>().ok())
            .ok_or_else(|| {
                ElasticError::Network(format!(
                    "{}: utilization command printed no number (stdout {:?}, stderr {:?})",
                    address,
                    output.stdout.trim(),
                    output.stderr.trim()
                ))
            })?;

        Ok(value > self.config.busy_threshold)
    }

    /// Number of workload containers running on the node
    pub async fn workload_count(&self, address: &str) -> ElasticResult<u32> {
        let output = self.exec.run(address, &self.config.workload_command).await?;
        if !output.success() {
            return Err(ElasticError::Network(format!(
                "{}: workload command exited with {}: {}",
                address,
                output.status,
                output.stderr.trim()
            )));
        }

        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count() as u32)
    }

    /// Sample a node, or `None` when it cannot be inspected this cycle
    pub async fn sample(&self, address: &str) -> Option<NodeSample> {
        let result = async {
            let workloads = self.workload_count(address).await?;
            let busy = self.utilization(address).await?;
            Ok::<_, ElasticError>(NodeSample { busy, workloads })
        }
        .await;

        match result {
            Ok(sample) => {
                debug!(
                    address = address,
                    busy = sample.busy,
                    workloads = sample.workloads,
                    "Probed node"
                );
                Some(sample)
            }
            Err(e) => {
                warn!(
                    address = address,
                    error = %e,
                    "Could not probe node, maybe it is spinning up or down"
                );
                None
            }
        }
    }
}
