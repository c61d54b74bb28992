//! # TickBridge Common Library
//!
//! Reusable components for the TickBridge synchronization and monitoring
//! engine. Modules are feature-gated per folder so binaries only pay for
//! what they use; enable `full` to get everything.

// Declare the modules to re-export
#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "stream")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "models")]
pub mod models;
#[cfg(feature = "monitoring")]
pub mod monitoring;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "sync")]
pub mod sync;

// Re-export the most commonly used types at the crate root.
#[cfg(feature = "configs")]
pub use configs::settings::*;
#[cfg(feature = "connections")]
pub use connections::backoff::BackoffPolicy;
#[cfg(feature = "connections")]
pub use connections::supervisor::{ConnectionSupervisor, Connector};
#[cfg(feature = "models")]
pub use models::*;
