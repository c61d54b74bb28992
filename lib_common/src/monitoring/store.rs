//! # Monitoring Store
//!
//! Durable append-only store for health history, integrity reports, backup
//! history, and the alert log. One JSONL file per category; every write is a
//! single-row append, so no cross-component locking is needed beyond the
//! store's own mutex. Alert acknowledge/resolve append an updated row;
//! nothing is ever rewritten in place or deleted.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::{Alert, BackupRecord, BackupStatus, BackupSystem, HealthRecord, IntegrityReport};

/// Health rows kept in memory; the JSONL files keep the full history.
const MAX_CACHED: usize = 5000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("monitoring store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("monitoring store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no alert with id {0}")]
    UnknownAlert(String),
}

#[derive(Default)]
struct Caches {
    health: Vec<HealthRecord>,
    integrity: Vec<IntegrityReport>,
    backups: Vec<BackupRecord>,
    /// Raw append order; reads reduce to last-writer-wins per alert id.
    alerts: Vec<Alert>,
}

pub struct MonitoringStore {
    dir: PathBuf,
    caches: Mutex<Caches>,
}

impl MonitoringStore {
    /// Opens the store inside `data_dir`, replaying any existing files.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = data_dir.join("monitoring");
        tokio::fs::create_dir_all(&dir).await?;
        let caches = Caches {
            health: Self::replay(&dir.join("health.jsonl")).await?,
            integrity: Self::replay(&dir.join("integrity.jsonl")).await?,
            backups: Self::replay(&dir.join("backups.jsonl")).await?,
            alerts: Self::replay(&dir.join("alerts.jsonl")).await?,
        };
        Ok(Self { dir, caches: Mutex::new(caches) })
    }

    async fn replay<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut rows = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            rows.push(serde_json::from_str(line)?);
        }
        Ok(rows)
    }

    async fn append_line<T: serde::Serialize>(&self, file: &str, row: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn append_health(&self, record: &HealthRecord) -> Result<(), StoreError> {
        let mut caches = self.caches.lock().await;
        self.append_line("health.jsonl", record).await?;
        caches.health.push(record.clone());
        if caches.health.len() > MAX_CACHED {
            let excess = caches.health.len() - MAX_CACHED;
            caches.health.drain(..excess);
        }
        Ok(())
    }

    pub async fn append_integrity(&self, report: &IntegrityReport) -> Result<(), StoreError> {
        let mut caches = self.caches.lock().await;
        self.append_line("integrity.jsonl", report).await?;
        caches.integrity.push(report.clone());
        Ok(())
    }

    pub async fn append_backup(&self, record: &BackupRecord) -> Result<(), StoreError> {
        let mut caches = self.caches.lock().await;
        self.append_line("backups.jsonl", record).await?;
        caches.backups.push(record.clone());
        Ok(())
    }

    /// Persists a freshly raised alert. Called before any delivery attempt.
    pub async fn append_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut caches = self.caches.lock().await;
        self.append_line("alerts.jsonl", alert).await?;
        caches.alerts.push(alert.clone());
        Ok(())
    }

    async fn update_alert(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Alert),
    ) -> Result<Alert, StoreError> {
        let mut caches = self.caches.lock().await;
        let mut latest = caches
            .alerts
            .iter()
            .rev()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAlert(id.to_string()))?;
        mutate(&mut latest);
        self.append_line("alerts.jsonl", &latest).await?;
        caches.alerts.push(latest.clone());
        Ok(latest)
    }

    pub async fn acknowledge_alert(&self, id: &str) -> Result<Alert, StoreError> {
        self.update_alert(id, |a| a.acknowledged = true).await
    }

    pub async fn resolve_alert(&self, id: &str) -> Result<Alert, StoreError> {
        self.update_alert(id, |a| a.resolved = true).await
    }

    /// Most recent health records, newest last.
    pub async fn health_records(&self, limit: usize) -> Vec<HealthRecord> {
        let caches = self.caches.lock().await;
        let skip = caches.health.len().saturating_sub(limit);
        caches.health[skip..].to_vec()
    }

    /// Latest record per component, for status replies.
    pub async fn latest_health(&self) -> HashMap<String, HealthRecord> {
        let caches = self.caches.lock().await;
        let mut latest = HashMap::new();
        for record in &caches.health {
            latest.insert(record.component.clone(), record.clone());
        }
        latest
    }

    pub async fn integrity_reports(&self, limit: usize) -> Vec<IntegrityReport> {
        let caches = self.caches.lock().await;
        let skip = caches.integrity.len().saturating_sub(limit);
        caches.integrity[skip..].to_vec()
    }

    pub async fn backup_records(&self, limit: usize) -> Vec<BackupRecord> {
        let caches = self.caches.lock().await;
        let skip = caches.backups.len().saturating_sub(limit);
        caches.backups[skip..].to_vec()
    }

    pub async fn last_successful_backup(&self, system: BackupSystem) -> Option<BackupRecord> {
        let caches = self.caches.lock().await;
        caches
            .backups
            .iter()
            .rev()
            .find(|b| b.system == system && b.status == BackupStatus::Success)
            .cloned()
    }

    /// Alerts in creation order, reduced to the latest row per id.
    pub async fn alerts(&self) -> Vec<Alert> {
        let caches = self.caches.lock().await;
        let mut order = Vec::new();
        let mut latest: HashMap<&str, &Alert> = HashMap::new();
        for alert in &caches.alerts {
            if latest.insert(alert.id.as_str(), alert).is_none() {
                order.push(alert.id.as_str());
            }
        }
        order.into_iter().map(|id| latest[id].clone()).collect()
    }
}
