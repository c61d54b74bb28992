//! Periodic drivers. Each cycle is an independent cooperative task owning its
//! own interval and selecting on the shutdown channel, so a stall in one
//! (e.g. a long integrity check) never delays another's next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use lib_common::configs::settings::{CollectionMapping, MonitorSettings};
use lib_common::connections::supervisor::ConnectionSupervisor;
use lib_common::models::{AlertSeverity, BackupStatus, ConnectionState, HealthStatus};
use lib_common::monitoring::health;
use lib_common::sync::pipeline::{BatchSyncPipeline, SyncMode};

use crate::sync_logic::state::AppState;

fn severity_for(status: HealthStatus) -> Option<AlertSeverity> {
    match status {
        HealthStatus::Healthy => None,
        HealthStatus::Warning => Some(AlertSeverity::Warning),
        HealthStatus::Critical => Some(AlertSeverity::Critical),
        HealthStatus::Unknown => Some(AlertSeverity::Info),
    }
}

/// Lightweight liveness probes between full cycles.
pub async fn run_liveness(state: AppState, interval_secs: u64, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("liveness cycle received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                state.health.check_all().await;
            }
        }
    }
}

/// Full monitoring cycle: probes, integrity, alerting, conditional backups.
pub async fn run_monitoring_cycle(
    state: AppState,
    settings: MonitorSettings,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.cycle_interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("monitoring cycle received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                run_cycle_once(&state, &settings).await;
            }
        }
    }
}

/// One full cycle. Every non-healthy probe and every below-floor report
/// raises exactly one alert (deduplicated within the cycle); failed backups
/// surface as warnings.
pub async fn run_cycle_once(state: &AppState, settings: &MonitorSettings) {
    state.dispatcher.begin_cycle();

    for record in state.health.check_all().await {
        if let Some(severity) = severity_for(record.status) {
            let message = record
                .error
                .clone()
                .unwrap_or_else(|| format!("{} is degraded", record.component));
            state.dispatcher.raise(severity, &record.component, &message).await;
        }
        // A failed probe counts as an unexpected disconnect for the
        // endpoint's supervisor, which owns the reconnect budget.
        if record.status == HealthStatus::Critical {
            let supervisor = match record.component.as_str() {
                health::COMPONENT_SOURCE => Some(state.source_supervisor.clone()),
                health::COMPONENT_SINK => Some(state.sink_supervisor.clone()),
                _ => None,
            };
            if let Some(supervisor) = supervisor {
                tokio::spawn(async move { supervisor.record_disconnect().await });
            }
        }
    }

    for report in state.integrity.check_consistency().await {
        if report.quality_score < settings.quality_floor {
            let message = format!(
                "quality score {:.2} below floor {:.2} ({} mismatched records)",
                report.quality_score, settings.quality_floor, report.mismatched_records
            );
            state.dispatcher.raise(AlertSeverity::Warning, &report.collection, &message).await;
        }
    }

    for record in state.backups.maybe_auto_backup().await {
        if record.status == BackupStatus::Failed {
            let message = format!(
                "{} backup failed: {}",
                record.system,
                record.error.as_deref().unwrap_or("unknown error")
            );
            state.dispatcher.raise(AlertSeverity::Warning, "backup", &message).await;
        }
    }
}

/// Incremental watermark sync of every configured table pair.
pub async fn run_sync(
    pipeline: Arc<BatchSyncPipeline>,
    mappings: Vec<CollectionMapping>,
    source_supervisor: Arc<ConnectionSupervisor>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("sync cycle received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                sync_once(&pipeline, &mappings, &source_supervisor).await;
            }
        }
    }
}

pub async fn sync_once(
    pipeline: &BatchSyncPipeline,
    mappings: &[CollectionMapping],
    source_supervisor: &Arc<ConnectionSupervisor>,
) {
    match source_supervisor.current_state() {
        ConnectionState::Failed => {
            log::warn!("source endpoint is failed; skipping sync cycle");
            return;
        }
        ConnectionState::Reconnecting => {
            log::info!("source endpoint is reconnecting; skipping sync cycle");
            return;
        }
        _ => {}
    }

    for mapping in mappings {
        match pipeline.sync_table(&mapping.table, &mapping.collection, SyncMode::Incremental).await
        {
            Ok(stats) => {
                log::info!(
                    "sync {} -> {}: processed={} synced={} failed={} invalid={}",
                    mapping.table,
                    mapping.collection,
                    stats.processed,
                    stats.synced,
                    stats.failed,
                    stats.invalid
                );
            }
            Err(err) => {
                log::error!(
                    "sync {} -> {} aborted: {}",
                    mapping.table,
                    mapping.collection,
                    err
                );
                if err.is_transient() {
                    let supervisor = source_supervisor.clone();
                    tokio::spawn(async move { supervisor.record_disconnect().await });
                    // One reconnect pass covers the remaining tables too.
                    break;
                }
            }
        }
    }
}
