//! # TickBridge Sync Server
//!
//! The production binary. Keeps the time-series market-data store and the
//! application-facing record store consistent, fans live updates out to
//! WebSocket subscribers, and continuously monitors both systems plus itself:
//! health probes, integrity checks, alerting, and backups.
//!
//! One long-lived tokio runtime per process; every periodic concern runs as
//! its own cooperative task selecting on a shared shutdown channel.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use lib_common::configs::settings::CollectionMapping;
use lib_common::connections::recordstore::{RecordStore, SinkClient};
use lib_common::connections::supervisor::{ConnectionSupervisor, Connector};
use lib_common::connections::tsdb::{TickSource, TsdbClient};
use lib_common::core::broadcaster::StreamBroadcaster;
use lib_common::ingestors::{Poller, RestTickProvider, TickProvider};
use lib_common::models::AlertSeverity;
use lib_common::monitoring::{
    AlertDispatcher, BackupManager, HealthMonitor, IntegrityChecker, MonitoringStore,
    ResourceSampler,
};
use lib_common::sync::{BatchSyncPipeline, CompanyDirectory, WatermarkStore};

mod sync_logic;
use sync_logic::{config, cycles, downstream, logger, state::AppState};

const RESOURCE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (merged, options) = config::load_config();
    // Missing required configuration refuses to start.
    let settings = merged.into_settings()?;
    logger::setup_logging(&options.log_dir, &options.log_level)?;

    log::info!("starting sync server on port {}", options.port);

    // Store clients.
    let tsdb = Arc::new(TsdbClient::new(&settings.source)?);
    let sink = Arc::new(SinkClient::new(&settings.sink)?);
    let source: Arc<dyn TickSource> = tsdb.clone();
    let record_store: Arc<dyn RecordStore> = sink.clone();

    // Durable state.
    let store = Arc::new(MonitoringStore::open(&settings.data_dir).await?);
    let watermarks = Arc::new(WatermarkStore::open(&settings.data_dir).await?);

    // Host metrics run on their own thread; probes read the latest sample.
    let resources = ResourceSampler::spawn(RESOURCE_SAMPLE_INTERVAL);

    let probe = settings.sync.mappings.first().cloned().unwrap_or(CollectionMapping {
        table: "stock_ticks".into(),
        collection: "ticks".into(),
    });

    let dispatcher = Arc::new(AlertDispatcher::new(store.clone(), settings.alerts.clone()));
    let health = Arc::new(HealthMonitor::new(
        source.clone(),
        record_store.clone(),
        store.clone(),
        resources,
        settings.monitor.clone(),
        &probe.table,
        &probe.collection,
    ));
    let integrity = Arc::new(IntegrityChecker::new(
        source.clone(),
        record_store.clone(),
        store.clone(),
        settings.sync.mappings.clone(),
    ));
    let backups = Arc::new(BackupManager::new(
        source.clone(),
        record_store.clone(),
        store.clone(),
        settings.backup.clone(),
        settings.sync.mappings.clone(),
    ));
    let broadcaster = Arc::new(StreamBroadcaster::new(
        Duration::from_millis(settings.stream.send_timeout_ms),
        settings.stream.subscriber_buffer,
    ));
    let pipeline = Arc::new(BatchSyncPipeline::new(
        source.clone(),
        record_store.clone(),
        watermarks,
        CompanyDirectory::default(),
        &settings.sync,
    ));

    // One supervisor per remote endpoint; exhausted reconnects raise a
    // critical alert requiring operator action.
    let source_supervisor = Arc::new(ConnectionSupervisor::new(
        "timeseries_source",
        tsdb.clone() as Arc<dyn Connector>,
        &settings.connection,
    ));
    let sink_supervisor = Arc::new(ConnectionSupervisor::new(
        "record_sink",
        sink.clone() as Arc<dyn Connector>,
        &settings.connection,
    ));
    for supervisor in [&source_supervisor, &sink_supervisor] {
        let dispatcher = dispatcher.clone();
        supervisor.set_failure_hook(move |component, message| {
            let dispatcher = dispatcher.clone();
            let component = component.to_string();
            let message = message.to_string();
            tokio::spawn(async move {
                dispatcher.raise(AlertSeverity::Critical, &component, &message).await;
            });
        });
    }

    // Initial connections. A failure here is tolerated; the monitors flag it
    // and the supervisors keep the reconnect budget for runtime disconnects.
    log::info!("source endpoint: {}", source_supervisor.connect().await);
    log::info!("sink endpoint: {}", sink_supervisor.connect().await);

    let providers: Vec<Arc<dyn TickProvider>> = settings
        .stream
        .providers
        .iter()
        .map(|p| Arc::new(RestTickProvider::new(p)) as Arc<dyn TickProvider>)
        .collect();
    let poller = Arc::new(Poller::new(
        providers,
        record_store.clone(),
        broadcaster.clone(),
        CompanyDirectory::default(),
        Duration::from_secs(settings.stream.poll_interval_secs),
    ));

    let app_state = AppState {
        broadcaster,
        store,
        health,
        integrity,
        dispatcher,
        backups,
        source_supervisor: source_supervisor.clone(),
        sink_supervisor,
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut handles = Vec::new();
    handles.push(tokio::spawn(cycles::run_liveness(
        app_state.clone(),
        settings.monitor.liveness_interval_secs,
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(cycles::run_monitoring_cycle(
        app_state.clone(),
        settings.monitor.clone(),
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(cycles::run_sync(
        pipeline,
        settings.sync.mappings.clone(),
        source_supervisor,
        settings.sync.interval_secs,
        shutdown_tx.subscribe(),
    )));
    {
        let poller = poller.clone();
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { poller.run(shutdown).await }));
    }
    handles.push(tokio::spawn(downstream::run(
        options.port,
        app_state,
        shutdown_tx.subscribe(),
    )));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal =
                    signal::unix::signal(signal::unix::SignalKind::terminate()).expect("SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components, then wait a bounded grace
    // period; nothing is guaranteed to complete past this point.
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(handles))
        .await
        .is_err()
    {
        log::warn!("grace period elapsed with tasks still running");
    }

    log::info!("Shutdown complete.");
    Ok(())
}
