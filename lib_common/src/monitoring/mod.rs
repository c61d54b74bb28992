//! Operational-health subsystem: durable monitoring store, host resource
//! sampling, health probes, integrity checks, alert dispatch, and backups.

pub mod alerts;
pub mod backup;
pub mod health;
pub mod integrity;
pub mod resources;
pub mod store;

pub use alerts::AlertDispatcher;
pub use backup::BackupManager;
pub use health::HealthMonitor;
pub use integrity::IntegrityChecker;
pub use resources::{ResourceSample, ResourceSampler};
pub use store::MonitoringStore;
