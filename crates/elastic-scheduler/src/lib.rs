//! elastic-scheduler: Scaling decisions and their execution
//!
//! This crate provides the control loop proper:
//! - Hysteresis decision engine over per-node utilization history
//! - Container lifecycle (graceful stop, drain wait)
//! - Fleet operator (expand, shrink, resuming interrupted shrinks)
//! - One autoscaling cycle wiring it all together

pub mod autoscaler;
pub mod engine;
pub mod lifecycle;
pub mod operator;

#[cfg(test)]
mod testing;

pub use autoscaler::{Autoscaler, CycleAction, CycleReport};
pub use engine::{compute_verdict, Evaluation, Observation, Snapshot};
pub use lifecycle::ContainerLifecycle;
pub use operator::{ExpandOutcome, FleetOperator, NodeFailure, ShrinkOutcome};
