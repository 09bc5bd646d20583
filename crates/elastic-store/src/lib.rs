//! elastic-store: History document persistence
//!
//! This crate provides the backends the control loop keeps its history in:
//! - Local JSON file with atomic replace
//! - In-memory document for tests and dry runs
//! - Optimistic version checking on every save

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use traits::{update, StateStore};
