use std::sync::Arc;

use lib_common::connections::supervisor::ConnectionSupervisor;
use lib_common::core::broadcaster::StreamBroadcaster;
use lib_common::monitoring::{
    AlertDispatcher, BackupManager, HealthMonitor, IntegrityChecker, MonitoringStore,
};

/// Shared state for the WebSocket push channel and the monitoring API.
/// Everything is an `Arc`; cloning the state is cheap and every handler sees
/// the same underlying components.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<StreamBroadcaster>,
    pub store: Arc<MonitoringStore>,
    pub health: Arc<HealthMonitor>,
    pub integrity: Arc<IntegrityChecker>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub backups: Arc<BackupManager>,
    pub source_supervisor: Arc<ConnectionSupervisor>,
    pub sink_supervisor: Arc<ConnectionSupervisor>,
}
