//! elastic-provider: Cloud fleet gateways
//!
//! This crate provides the provider-facing side of the control loop:
//! - The capability set every provider offers (list, create, wait, destroy)
//! - A Google Compute Engine gateway over its REST API

pub mod gce;
pub mod traits;

pub use gce::GceGateway;
pub use traits::FleetGateway;
