//! Fleet gateway trait definitions

use async_trait::async_trait;
use elastic_core::{ElasticResult, NodeTemplate, ProvisionedNode};

/// Capability set of a cloud provider, as seen by the control loop
#[async_trait]
pub trait FleetGateway: Send + Sync {
    /// List the nodes this system owns; foreign nodes are filtered out
    async fn list_nodes(&self) -> ElasticResult<Vec<ProvisionedNode>>;

    /// Request one node per name.
    ///
    /// Returns the nodes the provider accepted, which may be fewer than
    /// requested when capacity or quota runs out.
    async fn create_nodes(
        &self,
        names: &[String],
        template: &NodeTemplate,
    ) -> ElasticResult<Vec<ProvisionedNode>>;

    /// Block until the given nodes are running with an address.
    ///
    /// Returns the nodes that made it; stragglers are dropped.
    async fn wait_until_running(
        &self,
        nodes: &[ProvisionedNode],
    ) -> ElasticResult<Vec<ProvisionedNode>>;

    /// Destroy the named nodes, returning the names confirmed gone
    async fn destroy_nodes(&self, names: &[String]) -> ElasticResult<Vec<String>>;

    /// Get the provider name
    fn name(&self) -> &'static str;
}
