//! # Health Monitor
//!
//! Independent probes of the time-series source (lightweight count query),
//! the record sink (authenticated list call), and host resources. Probes run
//! concurrently, each under its own timeout, so one slow probe cannot stall
//! the others. Every probe outcome is appended to the monitoring store.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;

use super::resources::ResourceSample;
use super::store::MonitoringStore;
use crate::configs::settings::MonitorSettings;
use crate::connections::recordstore::RecordStore;
use crate::connections::tsdb::TickSource;
use crate::models::{HealthRecord, HealthStatus};

pub const COMPONENT_SOURCE: &str = "timeseries_source";
pub const COMPONENT_SINK: &str = "record_sink";
pub const COMPONENT_HOST: &str = "host_resources";

pub struct HealthMonitor {
    source: Arc<dyn TickSource>,
    sink: Arc<dyn RecordStore>,
    store: Arc<MonitoringStore>,
    resources: watch::Receiver<Option<ResourceSample>>,
    settings: MonitorSettings,
    /// Table used for the lightweight source count probe.
    probe_table: String,
    /// Collection used for the authenticated sink list probe.
    probe_collection: String,
}

impl HealthMonitor {
    pub fn new(
        source: Arc<dyn TickSource>,
        sink: Arc<dyn RecordStore>,
        store: Arc<MonitoringStore>,
        resources: watch::Receiver<Option<ResourceSample>>,
        settings: MonitorSettings,
        probe_table: &str,
        probe_collection: &str,
    ) -> Self {
        Self {
            source,
            sink,
            store,
            resources,
            settings,
            probe_table: probe_table.to_string(),
            probe_collection: probe_collection.to_string(),
        }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.probe_timeout_ms)
    }

    /// Runs all probes concurrently and appends each record to the store.
    pub async fn check_all(&self) -> Vec<HealthRecord> {
        let (source, sink, host) =
            tokio::join!(self.probe_source(), self.probe_sink(), self.probe_host());
        let records = vec![source, sink, host];
        for record in &records {
            if let Err(err) = self.store.append_health(record).await {
                log::error!("failed to persist health record for {}: {}", record.component, err);
            }
        }
        records
    }

    /// Probes a single component by name. Unknown names report `unknown`.
    pub async fn check_component(&self, name: &str) -> HealthRecord {
        let record = match name {
            COMPONENT_SOURCE => self.probe_source().await,
            COMPONENT_SINK => self.probe_sink().await,
            COMPONENT_HOST => self.probe_host().await,
            other => HealthRecord {
                component: other.to_string(),
                status: HealthStatus::Unknown,
                latency_ms: None,
                error: Some(format!("unknown component '{}'", other)),
                details: None,
                timestamp: chrono::Utc::now(),
            },
        };
        if let Err(err) = self.store.append_health(&record).await {
            log::error!("failed to persist health record for {}: {}", record.component, err);
        }
        record
    }

    async fn probe_source(&self) -> HealthRecord {
        let started = Instant::now();
        let outcome = timeout(self.probe_timeout(), self.source.count_rows(&self.probe_table)).await;
        let latency = started.elapsed();
        match outcome {
            Ok(Ok(count)) => Self::classify(
                COMPONENT_SOURCE,
                latency,
                self.settings.source_latency_warn_ms,
                Some(serde_json::json!({ "rowCount": count })),
            ),
            Ok(Err(err)) => Self::critical(COMPONENT_SOURCE, latency, err.to_string()),
            Err(_) => Self::timed_out(COMPONENT_SOURCE, self.probe_timeout()),
        }
    }

    async fn probe_sink(&self) -> HealthRecord {
        let started = Instant::now();
        let outcome = timeout(
            self.probe_timeout(),
            self.sink.list_records(&self.probe_collection, 1, 1),
        )
        .await;
        let latency = started.elapsed();
        match outcome {
            Ok(Ok(page)) => Self::classify(
                COMPONENT_SINK,
                latency,
                self.settings.sink_latency_warn_ms,
                Some(serde_json::json!({ "totalItems": page.total_items })),
            ),
            Ok(Err(err)) => Self::critical(COMPONENT_SINK, latency, err.to_string()),
            Err(_) => Self::timed_out(COMPONENT_SINK, self.probe_timeout()),
        }
    }

    async fn probe_host(&self) -> HealthRecord {
        let sample = *self.resources.borrow();
        let timestamp = chrono::Utc::now();
        match sample {
            None => HealthRecord {
                component: COMPONENT_HOST.to_string(),
                status: HealthStatus::Unknown,
                latency_ms: None,
                error: Some("no resource sample yet".into()),
                details: None,
                timestamp,
            },
            Some(sample) => {
                let mut breaches = Vec::new();
                if sample.cpu_pct > self.settings.cpu_warn_pct {
                    breaches.push(format!("cpu {:.1}%", sample.cpu_pct));
                }
                if sample.memory_pct > self.settings.memory_warn_pct {
                    breaches.push(format!("memory {:.1}%", sample.memory_pct));
                }
                if sample.disk_pct > self.settings.disk_warn_pct {
                    breaches.push(format!("disk {:.1}%", sample.disk_pct));
                }
                // Resource breaches are capacity warnings, never critical.
                let status = if breaches.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Warning
                };
                HealthRecord {
                    component: COMPONENT_HOST.to_string(),
                    status,
                    latency_ms: None,
                    error: if breaches.is_empty() {
                        None
                    } else {
                        Some(format!("resource thresholds breached: {}", breaches.join(", ")))
                    },
                    details: serde_json::to_value(sample).ok(),
                    timestamp,
                }
            }
        }
    }

    fn classify(
        component: &str,
        latency: Duration,
        warn_ms: u64,
        details: Option<serde_json::Value>,
    ) -> HealthRecord {
        let latency_ms = latency.as_millis() as u64;
        let status = if latency_ms > warn_ms {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        HealthRecord {
            component: component.to_string(),
            status,
            latency_ms: Some(latency_ms),
            error: (status == HealthStatus::Warning)
                .then(|| format!("latency {}ms above {}ms threshold", latency_ms, warn_ms)),
            details,
            timestamp: chrono::Utc::now(),
        }
    }

    fn critical(component: &str, latency: Duration, error: String) -> HealthRecord {
        HealthRecord {
            component: component.to_string(),
            status: HealthStatus::Critical,
            latency_ms: Some(latency.as_millis() as u64),
            error: Some(error),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    fn timed_out(component: &str, budget: Duration) -> HealthRecord {
        HealthRecord {
            component: component.to_string(),
            status: HealthStatus::Critical,
            latency_ms: Some(budget.as_millis() as u64),
            error: Some(format!("probe timed out after {:?}", budget)),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }
}
