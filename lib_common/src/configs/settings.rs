//! # Typed Settings
//!
//! The validated configuration surface shared by every component. The server
//! binary assembles these from defaults, an optional JSON config file,
//! environment variables, and CLI flags (in that order of precedence); the
//! library only ever sees the merged, validated result.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration error. The process refuses to start on any of these.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Time-series store (source of truth). Read-only access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSettings {
    /// Base URL of the query endpoint, e.g. `http://localhost:9000/`.
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Application-facing record store (sink).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkSettings {
    pub base_url: String,
    pub admin_identity: String,
    pub admin_password: String,
}

/// One logical collection: a source table synchronized into a sink collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMapping {
    pub table: String,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Rows fetched per source page.
    pub page_size: usize,
    /// Records per batch-create call.
    pub upload_batch_size: usize,
    /// Retries after the first attempt for one failing batch.
    pub max_retries: u32,
    /// Base delay for the batch retry backoff, doubled per attempt.
    pub backoff_base_ms: u64,
    /// Incremental sync cadence.
    pub interval_secs: u64,
    pub mappings: Vec<CollectionMapping>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            upload_batch_size: 50,
            max_retries: 5,
            backoff_base_ms: 1000,
            interval_secs: 300,
            mappings: Vec::new(),
        }
    }
}

/// Reconnect behaviour for supervised endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { max_attempts: 10, base_delay_ms: 1000, max_delay_ms: 60_000 }
    }
}

/// One upstream live-tick provider polled on the stream path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub name: String,
    pub url: String,
    /// Sink collection receiving this provider's single-record uploads.
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Provider polling cadence.
    pub poll_interval_secs: u64,
    /// Per-subscriber send timeout before the subscriber is dropped.
    pub send_timeout_ms: u64,
    /// Frames buffered per subscriber before it counts as unresponsive.
    pub subscriber_buffer: usize,
    pub providers: Vec<ProviderSettings>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            send_timeout_ms: 5000,
            subscriber_buffer: 64,
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    /// Lightweight liveness probe cadence.
    pub liveness_interval_secs: u64,
    /// Full cycle cadence: probes + integrity + conditional backup.
    pub cycle_interval_secs: u64,
    /// Budget for a single probe; a slow probe cannot stall the others.
    pub probe_timeout_ms: u64,
    /// Probe latency above this is a warning, per component.
    pub source_latency_warn_ms: u64,
    pub sink_latency_warn_ms: u64,
    /// Host resource warning thresholds, in percent.
    pub cpu_warn_pct: f32,
    pub memory_warn_pct: f32,
    pub disk_warn_pct: f32,
    /// Integrity alerting floor for the quality score.
    pub quality_floor: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            liveness_interval_secs: 60,
            cycle_interval_secs: 300,
            probe_timeout_ms: 10_000,
            source_latency_warn_ms: 2000,
            sink_latency_warn_ms: 2000,
            cpu_warn_pct: 85.0,
            memory_warn_pct: 90.0,
            disk_warn_pct: 90.0,
            quality_floor: 0.95,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertSettings {
    /// Webhook endpoints receiving the alert JSON payload.
    pub webhooks: Vec<String>,
    /// HTTP mail relay endpoint; alerts are posted there for email fan-out.
    pub mail_relay_url: Option<String>,
    pub mail_to: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSettings {
    /// Directory receiving backup archives.
    pub dir: PathBuf,
    /// Auto-trigger a backup when none succeeded within this window.
    pub auto_window_hours: i64,
    /// Archives older than this are pruned after a successful run.
    pub retention_days: i64,
    /// Rows per export page.
    pub page_size: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./backups"),
            auto_window_hours: 24,
            retention_days: 14,
            page_size: 500,
        }
    }
}

/// The complete validated configuration of one TickBridge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Directory for the monitoring store and watermarks.
    pub data_dir: PathBuf,
    pub source: SourceSettings,
    pub sink: SinkSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

impl Settings {
    /// Startup validation. Anything failing here is fatal.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.source.base_url.is_empty() {
            return Err(SettingsError::Missing("source.baseUrl"));
        }
        if self.sink.base_url.is_empty() {
            return Err(SettingsError::Missing("sink.baseUrl"));
        }
        if self.sink.admin_identity.is_empty() {
            return Err(SettingsError::Missing("sink.adminIdentity"));
        }
        if self.sink.admin_password.is_empty() {
            return Err(SettingsError::Missing("sink.adminPassword"));
        }
        if self.sync.page_size == 0 {
            return Err(SettingsError::Invalid {
                field: "sync.pageSize",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.monitor.quality_floor) {
            return Err(SettingsError::Invalid {
                field: "monitor.qualityFloor",
                reason: format!("{} is outside [0, 1]", self.monitor.quality_floor),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            data_dir: PathBuf::from("./data"),
            source: SourceSettings {
                base_url: "http://localhost:9000/".into(),
                username: None,
                password: None,
            },
            sink: SinkSettings {
                base_url: "http://localhost:8090/".into(),
                admin_identity: "admin@example.com".into(),
                admin_password: "secret".into(),
            },
            connection: ConnectionSettings::default(),
            sync: SyncSettings::default(),
            stream: StreamSettings::default(),
            monitor: MonitorSettings::default(),
            alerts: AlertSettings::default(),
            backup: BackupSettings::default(),
        }
    }

    #[test]
    fn valid_settings_pass() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn missing_sink_password_is_fatal() {
        let mut s = settings();
        s.sink.admin_password.clear();
        assert!(matches!(s.validate(), Err(SettingsError::Missing("sink.adminPassword"))));
    }

    #[test]
    fn quality_floor_must_be_a_ratio() {
        let mut s = settings();
        s.monitor.quality_floor = 1.5;
        assert!(matches!(s.validate(), Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn defaults_match_documented_cadences() {
        let s = SyncSettings::default();
        assert_eq!(s.page_size, 1000);
        assert_eq!(s.max_retries, 5);
        let m = MonitorSettings::default();
        assert_eq!(m.liveness_interval_secs, 60);
        assert_eq!(m.cycle_interval_secs, 300);
        assert_eq!(m.quality_floor, 0.95);
    }
}
