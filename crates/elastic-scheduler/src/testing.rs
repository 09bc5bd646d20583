//! In-process fakes for the fleet, its nodes and the state store

use async_trait::async_trait;
use elastic_core::{
    ElasticConfig, ElasticError, ElasticResult, HistoryDocument, NodeNaming, NodeTemplate,
    ProbeConfig, ProvisionedNode, ScalingConfig,
};
use elastic_network::{CommandOutput, HealthProbe, RemoteExec};
use elastic_provider::FleetGateway;
use elastic_store::{MemoryStateStore, StateStore};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::autoscaler::Autoscaler;
use crate::lifecycle::ContainerLifecycle;
use crate::operator::FleetOperator;

/// Name of a managed node created at 10:`minute` on a fixed day
pub fn node_name(minute: u32) -> String {
    format!("gpu-03-14-2019-10-{:02}-00", minute)
}

pub fn node_address(minute: u32) -> String {
    format!("10.0.0.{}", minute)
}

/// Behaviour of one simulated node
#[derive(Debug, Clone)]
pub struct FakeNode {
    /// Value printed by the utilization command
    pub marker: u64,
    /// Workload containers running
    pub workloads: u32,
    pub reachable: bool,
    /// Workload polls that still report running after a stop
    pub drain_polls: u32,
    /// Workload never exits after a stop
    pub stuck: bool,
    /// A stop command has been received
    pub stopping: bool,
}

impl FakeNode {
    pub fn busy() -> Self {
        Self {
            marker: 9,
            workloads: 1,
            reachable: true,
            drain_polls: 0,
            stuck: false,
            stopping: false,
        }
    }

    pub fn idle() -> Self {
        Self {
            marker: 2,
            ..Self::busy()
        }
    }

    /// Started but workload not up yet
    pub fn booting() -> Self {
        Self {
            marker: 0,
            workloads: 0,
            ..Self::busy()
        }
    }

    fn reply(&mut self, command: &str, probe: &ProbeConfig) -> CommandOutput {
        let stdout = if command == probe.utilization_command {
            format!("{}\n", self.marker)
        } else if command == probe.workload_command {
            if self.stopping && !self.stuck {
                if self.drain_polls > 0 {
                    self.drain_polls -= 1;
                } else {
                    self.workloads = 0;
                }
            }
            "a1b2c3d4\n".repeat(self.workloads as usize)
        } else if command.starts_with("sudo docker stop") {
            self.stopping = true;
            "compute_worker\n".to_string()
        } else {
            return CommandOutput {
                stdout: String::new(),
                stderr: format!("unknown command: {}", command),
                status: 127,
            };
        };

        CommandOutput {
            stdout,
            stderr: String::new(),
            status: 0,
        }
    }
}

/// Remote execution against simulated nodes, keyed by address
#[derive(Default)]
pub struct FakeExec {
    nodes: Mutex<HashMap<String, FakeNode>>,
    log: Mutex<Vec<(String, String)>>,
    probe: ProbeConfig,
}

impl FakeExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, address: &str, node: FakeNode) {
        self.nodes
            .lock()
            .unwrap()
            .insert(address.to_string(), node);
    }

    pub fn update(&self, address: &str, f: impl FnOnce(&mut FakeNode)) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(address) {
            f(node);
        }
    }

    /// Every `(address, command)` run so far, in order
    pub fn commands(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExec for FakeExec {
    async fn run(&self, address: &str, command: &str) -> ElasticResult<CommandOutput> {
        self.log
            .lock()
            .unwrap()
            .push((address.to_string(), command.to_string()));

        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(address) {
            Some(node) if node.reachable => Ok(node.reply(command, &self.probe)),
            _ => Err(ElasticError::Unreachable(address.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Cloud provider holding its fleet in memory
pub struct FakeGateway {
    naming: NodeNaming,
    nodes: Mutex<Vec<ProvisionedNode>>,
    capacity: Mutex<Option<usize>>,
    undeletable: Mutex<HashSet<String>>,
    next_host: Mutex<u32>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            naming: NodeNaming::new("gpu"),
            nodes: Mutex::new(Vec::new()),
            capacity: Mutex::new(None),
            undeletable: Mutex::new(HashSet::new()),
            next_host: Mutex::new(1),
        }
    }

    pub fn add_node(&self, name: &str, address: Option<&str>) {
        self.nodes.lock().unwrap().push(ProvisionedNode {
            name: name.to_string(),
            address: address.map(str::to_string),
            created_at: self.naming.created_at(name).unwrap_or_default(),
        });
    }

    /// Accept at most `count` more creations
    pub fn set_capacity(&self, count: usize) {
        *self.capacity.lock().unwrap() = Some(count);
    }

    pub fn refuse_destroy(&self, name: &str) {
        self.undeletable.lock().unwrap().insert(name.to_string());
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.name.clone())
            .collect()
    }
}

#[async_trait]
impl FleetGateway for FakeGateway {
    async fn list_nodes(&self) -> ElasticResult<Vec<ProvisionedNode>> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn create_nodes(
        &self,
        names: &[String],
        _template: &NodeTemplate,
    ) -> ElasticResult<Vec<ProvisionedNode>> {
        let mut capacity = self.capacity.lock().unwrap();
        let mut nodes = self.nodes.lock().unwrap();
        let mut host = self.next_host.lock().unwrap();
        let mut accepted = Vec::new();

        for name in names {
            if let Some(left) = capacity.as_mut() {
                if *left == 0 {
                    break;
                }
                *left -= 1;
            }
            let created_at = self.naming.created_at(name).unwrap_or_default();
            nodes.push(ProvisionedNode {
                name: name.clone(),
                address: Some(format!("10.1.0.{}", *host)),
                created_at,
            });
            *host += 1;
            accepted.push(ProvisionedNode {
                name: name.clone(),
                address: None,
                created_at,
            });
        }
        Ok(accepted)
    }

    async fn wait_until_running(
        &self,
        nodes: &[ProvisionedNode],
    ) -> ElasticResult<Vec<ProvisionedNode>> {
        let listed = self.nodes.lock().unwrap();
        Ok(listed
            .iter()
            .filter(|n| nodes.iter().any(|w| w.name == n.name))
            .cloned()
            .collect())
    }

    async fn destroy_nodes(&self, names: &[String]) -> ElasticResult<Vec<String>> {
        let undeletable = self.undeletable.lock().unwrap();
        let mut nodes = self.nodes.lock().unwrap();
        let gone: Vec<String> = names
            .iter()
            .filter(|n| !undeletable.contains(*n))
            .cloned()
            .collect();
        nodes.retain(|n| !gone.contains(&n.name));
        Ok(gone)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Memory store that can be switched to failing
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStateStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> ElasticResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ElasticError::Storage("disk on fire".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self) -> ElasticResult<HistoryDocument> {
        self.check()?;
        self.inner.load().await
    }

    async fn save(&self, doc: &HistoryDocument) -> ElasticResult<HistoryDocument> {
        self.check()?;
        self.inner.save(doc).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// A fake fleet wired up the way the CLI wires the real one
pub struct Harness {
    pub config: ElasticConfig,
    pub gateway: Arc<FakeGateway>,
    pub exec: Arc<FakeExec>,
    pub store: Arc<FlakyStore>,
}

impl Harness {
    pub fn new(min_nodes: u32, max_nodes: u32) -> Self {
        let mut config = ElasticConfig::default();
        config.scaling = ScalingConfig {
            min_nodes,
            max_nodes,
            ..ScalingConfig::default()
        };
        config.provider.name_prefix = "gpu".to_string();
        config.lifecycle.drain_poll_interval_ms = 5;
        config.lifecycle.drain_timeout_secs = 1;

        Self {
            config,
            gateway: Arc::new(FakeGateway::new()),
            exec: Arc::new(FakeExec::new()),
            store: Arc::new(FlakyStore::default()),
        }
    }

    pub fn add(&self, minute: u32, node: FakeNode) {
        let address = node_address(minute);
        self.gateway.add_node(&node_name(minute), Some(&address));
        self.exec.add(&address, node);
    }

    pub fn add_busy(&self, minute: u32) {
        self.add(minute, FakeNode::busy());
    }

    pub fn add_idle(&self, minute: u32) {
        self.add(minute, FakeNode::idle());
    }

    pub fn add_stuck(&self, minute: u32) {
        self.add(
            minute,
            FakeNode {
                stuck: true,
                ..FakeNode::idle()
            },
        );
    }

    /// Change what a node reports from now on
    pub fn set(&self, minute: u32, node: FakeNode) {
        self.exec.update(&node_address(minute), |n| *n = node);
    }

    pub async fn seed(&self, f: impl FnOnce(&mut HistoryDocument)) {
        let mut doc = self.store.load().await.unwrap();
        f(&mut doc);
        self.store.save(&doc).await.unwrap();
    }

    pub fn store_fails(&self) {
        self.store.failing.store(true, Ordering::SeqCst);
    }

    pub fn lifecycle(&self) -> ContainerLifecycle {
        let probe = HealthProbe::new(self.exec.clone(), self.config.probe.clone());
        ContainerLifecycle::new(probe, self.config.lifecycle.clone())
    }

    pub fn operator(&self) -> FleetOperator {
        FleetOperator::new(
            self.gateway.clone(),
            self.store.clone(),
            self.lifecycle(),
            self.config.scaling,
            NodeNaming::new(self.config.provider.name_prefix.clone()),
            self.config.provider.template(),
        )
    }

    pub fn autoscaler(&self) -> Autoscaler {
        Autoscaler::new(
            self.gateway.clone(),
            self.exec.clone(),
            self.store.clone(),
            &self.config,
        )
    }
}
