//! Monitoring-path integration: probes against degraded stores, alert
//! lifecycle through the durable store, and backup behaviour over the
//! in-memory stores.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use lib_common::configs::settings::{
    AlertSettings, BackupSettings, CollectionMapping, MonitorSettings,
};
use lib_common::connections::recordstore::RecordStore;
use lib_common::models::{AlertSeverity, BackupStatus, BackupSystem, BackupType, HealthStatus};
use lib_common::monitoring::{
    AlertDispatcher, BackupManager, HealthMonitor, IntegrityChecker, MonitoringStore,
};
use tokio::sync::watch;

use project_tests::memory::{tick_on_day, MemoryRecordSink, MemoryTickSource};

fn mapping() -> CollectionMapping {
    CollectionMapping { table: "stock_ticks".into(), collection: "ticks".into() }
}

#[tokio::test]
async fn degraded_source_produces_a_critical_record_and_one_alert() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MonitoringStore::open(dir.path()).await.unwrap());
    let source = Arc::new(MemoryTickSource::new(vec![tick_on_day("PKN", 1, 60.0)]));
    source.fail.store(true, Ordering::SeqCst);
    let sink = Arc::new(MemoryRecordSink::default());
    let (_tx, resources) = watch::channel(None);

    let monitor = HealthMonitor::new(
        source,
        sink,
        store.clone(),
        resources,
        MonitorSettings::default(),
        "stock_ticks",
        "ticks",
    );
    let dispatcher = AlertDispatcher::new(store.clone(), AlertSettings::default());

    // One monitoring cycle: probe, then raise for every non-healthy record.
    dispatcher.begin_cycle();
    for record in monitor.check_all().await {
        if record.status != HealthStatus::Healthy && record.status != HealthStatus::Unknown {
            dispatcher
                .raise(
                    AlertSeverity::Critical,
                    &record.component,
                    record.error.as_deref().unwrap_or("degraded"),
                )
                .await;
        }
    }

    let health = store.health_records(10).await;
    assert_eq!(health.len(), 3);
    let source_record =
        health.iter().find(|r| r.component == "timeseries_source").unwrap();
    assert_eq!(source_record.status, HealthStatus::Critical);

    let alerts = store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].component, "timeseries_source");

    // The same breach in the same cycle stays deduplicated.
    dispatcher
        .raise(AlertSeverity::Critical, "timeseries_source", &alerts[0].message)
        .await;
    assert_eq!(store.alerts().await.len(), 1);
}

#[tokio::test]
async fn below_floor_quality_raises_a_warning_with_the_report_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MonitoringStore::open(dir.path()).await.unwrap());

    // 5 source rows, 4 sink records: quality 0.8, below the 0.95 floor.
    let ticks: Vec<_> = (1..=5).map(|d| tick_on_day("PKN", d, 60.0)).collect();
    let source = Arc::new(MemoryTickSource::new(ticks.clone()));
    let sink = Arc::new(MemoryRecordSink::default());
    for tick in ticks.iter().take(4) {
        let record = lib_common::models::SinkRecord::from_tick(tick, "PKN Orlen");
        sink.create_record("ticks", &record).await.unwrap();
    }

    let checker = IntegrityChecker::new(source, sink, store.clone(), vec![mapping()]);
    let dispatcher = AlertDispatcher::new(store.clone(), AlertSettings::default());
    let settings = MonitorSettings::default();

    dispatcher.begin_cycle();
    for report in checker.check_consistency().await {
        assert_eq!(report.quality_score, 0.8);
        assert_eq!(report.issues.len(), 1);
        if report.quality_score < settings.quality_floor {
            dispatcher
                .raise(
                    AlertSeverity::Warning,
                    &report.collection,
                    &format!("quality score {:.2} below floor", report.quality_score),
                )
                .await;
        }
    }

    let alerts = store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);

    // Acknowledge and resolve flow through the append-only log.
    let acked = store.acknowledge_alert(&alerts[0].id).await.unwrap();
    assert!(acked.acknowledged);
    let resolved = store.resolve_alert(&alerts[0].id).await.unwrap();
    assert!(resolved.resolved);
    let final_state = store.alerts().await;
    assert!(final_state[0].acknowledged && final_state[0].resolved);
}

#[tokio::test]
async fn manual_backups_always_run_and_auto_backups_respect_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MonitoringStore::open(dir.path()).await.unwrap());
    let source = Arc::new(MemoryTickSource::new(vec![
        tick_on_day("PKN", 1, 60.0),
        tick_on_day("PKN", 2, 61.0),
    ]));
    let sink = Arc::new(MemoryRecordSink::default());
    let settings = BackupSettings { dir: dir.path().join("backups"), ..BackupSettings::default() };
    let manager =
        BackupManager::new(source, sink, store.clone(), settings, vec![mapping()]);

    // Nothing succeeded yet: both systems are due.
    assert!(manager.auto_backup_due(BackupSystem::Timeseries).await);
    assert!(manager.auto_backup_due(BackupSystem::Records).await);

    let auto = manager.maybe_auto_backup().await;
    assert_eq!(auto.len(), 2);
    assert!(auto.iter().all(|r| r.status == BackupStatus::Success));

    // Within the window nothing re-triggers, but a manual run still works.
    assert!(manager.maybe_auto_backup().await.is_empty());
    let manual = manager.backup(BackupSystem::Timeseries, BackupType::Full).await;
    assert_eq!(manual.status, BackupStatus::Success);

    // Identical data: same checksum as the auto run, different id.
    let auto_ts = auto.iter().find(|r| r.system == BackupSystem::Timeseries).unwrap();
    assert_eq!(manual.checksum, auto_ts.checksum);
    assert_ne!(manual.id, auto_ts.id);

    assert_eq!(store.backup_records(10).await.len(), 3);
}

#[tokio::test]
async fn healthy_stores_produce_a_quiet_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MonitoringStore::open(dir.path()).await.unwrap());
    let source = Arc::new(MemoryTickSource::new(vec![tick_on_day("PKN", 1, 60.0)]));
    let sink = Arc::new(MemoryRecordSink::default());
    let record = lib_common::models::SinkRecord::from_tick(&tick_on_day("PKN", 1, 60.0), "PKN Orlen");
    sink.create_record("ticks", &record).await.unwrap();
    let (_tx, resources) = watch::channel(None);

    let monitor = HealthMonitor::new(
        source.clone(),
        sink.clone(),
        store.clone(),
        resources,
        MonitorSettings::default(),
        "stock_ticks",
        "ticks",
    );
    let records = monitor.check_all().await;
    let source_record = records.iter().find(|r| r.component == "timeseries_source").unwrap();
    let sink_record = records.iter().find(|r| r.component == "record_sink").unwrap();
    assert_eq!(source_record.status, HealthStatus::Healthy);
    assert_eq!(sink_record.status, HealthStatus::Healthy);
    assert!(source_record.latency_ms.is_some());

    // Matching counts keep integrity quiet as well.
    let checker = IntegrityChecker::new(source, sink, store.clone(), vec![mapping()]);
    let reports = checker.check_consistency().await;
    assert_eq!(reports[0].quality_score, 1.0);
    assert!(reports[0].issues.is_empty());
    assert!(store.alerts().await.is_empty());
}
