//! elastic-network: Remote execution and utilization probing
//!
//! This crate provides the node-facing side of the control loop:
//! - Remote command execution over ssh
//! - Utilization and workload probing

pub mod probe;
pub mod transport;

pub use probe::{HealthProbe, NodeSample};
pub use transport::{CommandOutput, RemoteExec, SshTransport};
