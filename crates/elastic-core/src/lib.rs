//! elastic-core: Core types for the elastic autoscaler
//!
//! This crate provides the types shared by every other elastic crate:
//! - Node naming, utilization and container states
//! - The persisted history document
//! - Scaling configuration and verdicts
//! - Error handling

pub mod config;
pub mod error;
pub mod history;
pub mod node;
pub mod verdict;

pub use config::*;
pub use error::*;
pub use history::*;
pub use node::*;
pub use verdict::*;
