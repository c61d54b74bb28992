//! # Backup Manager
//!
//! Periodic/on-demand snapshots of both stores. The export is written as
//! JSONL, compressed into a zip archive and checksummed; any failing step
//! marks the record `failed` with the causing error and is not auto-retried;
//! the failure surfaces as a warning alert raised by the monitoring cycle.
//! The checksum is computed over the export content in deterministic order,
//! so identical data always yields an identical checksum while every archive
//! keeps its own id.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use zip::write::FileOptions;

use super::store::MonitoringStore;
use crate::configs::settings::{BackupSettings, CollectionMapping};
use crate::connections::backoff::BackoffPolicy;
use crate::connections::recordstore::{RecordStore, SinkError};
use crate::connections::tsdb::{SourceError, TickSource};
use crate::models::{BackupRecord, BackupStatus, BackupSystem, BackupType};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("export from time-series store failed: {0}")]
    Source(#[from] SourceError),
    #[error("export from record store failed: {0}")]
    Sink(#[from] SinkError),
    #[error("backup I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive step failed: {0}")]
    Archive(String),
}

struct Artifact {
    path: PathBuf,
    size_bytes: u64,
    checksum: String,
}

pub struct BackupManager {
    source: Arc<dyn TickSource>,
    sink: Arc<dyn RecordStore>,
    store: Arc<MonitoringStore>,
    settings: BackupSettings,
    mappings: Vec<CollectionMapping>,
    /// Transient retry for individual export pages. A backup whose export
    /// still fails is recorded as failed and never re-run automatically.
    page_policy: BackoffPolicy,
}

impl BackupManager {
    pub fn new(
        source: Arc<dyn TickSource>,
        sink: Arc<dyn RecordStore>,
        store: Arc<MonitoringStore>,
        settings: BackupSettings,
        mappings: Vec<CollectionMapping>,
    ) -> Self {
        let page_policy = BackoffPolicy {
            max_retries: 2,
            base_delay: std::time::Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: std::time::Duration::from_secs(2),
        };
        Self { source, sink, store, settings, mappings, page_policy }
    }

    /// Runs one backup and records the outcome, successful or not.
    pub async fn backup(&self, system: BackupSystem, backup_type: BackupType) -> BackupRecord {
        let id = Uuid::new_v4().to_string();
        log::info!("starting {} backup of {} ({})", backup_type, system, id);

        let record = match self.run_backup(system, backup_type, &id).await {
            Ok(artifact) => BackupRecord {
                id,
                system,
                backup_type,
                path: Some(artifact.path.display().to_string()),
                size_bytes: artifact.size_bytes,
                checksum: Some(artifact.checksum),
                status: BackupStatus::Success,
                error: None,
                created_at: Utc::now(),
            },
            Err(err) => {
                log::error!("{} backup of {} failed: {}", backup_type, system, err);
                BackupRecord {
                    id,
                    system,
                    backup_type,
                    path: None,
                    size_bytes: 0,
                    checksum: None,
                    status: BackupStatus::Failed,
                    error: Some(err.to_string()),
                    created_at: Utc::now(),
                }
            }
        };

        if let Err(err) = self.store.append_backup(&record).await {
            log::error!("failed to persist backup record {}: {}", record.id, err);
        }
        if record.status == BackupStatus::Success {
            self.prune_old_archives().await;
        }
        record
    }

    /// True when no successful backup for `system` exists within the
    /// configured auto-trigger window.
    pub async fn auto_backup_due(&self, system: BackupSystem) -> bool {
        match self.store.last_successful_backup(system).await {
            None => true,
            Some(last) => {
                Utc::now() - last.created_at > chrono::Duration::hours(self.settings.auto_window_hours)
            }
        }
    }

    /// Conditional trigger used by the monitoring cycle. Manual triggers call
    /// [`BackupManager::backup`] directly and always run.
    pub async fn maybe_auto_backup(&self) -> Vec<BackupRecord> {
        let mut records = Vec::new();
        for system in [BackupSystem::Timeseries, BackupSystem::Records] {
            if self.auto_backup_due(system).await {
                records.push(self.backup(system, BackupType::Full).await);
            }
        }
        records
    }

    async fn run_backup(
        &self,
        system: BackupSystem,
        backup_type: BackupType,
        id: &str,
    ) -> Result<Artifact, BackupError> {
        let files = match system {
            BackupSystem::Timeseries => self.export_timeseries(backup_type).await?,
            BackupSystem::Records => self.export_records().await?,
        };

        let archive_path = self
            .settings
            .dir
            .join(format!("{}-{}-{}.zip", system, backup_type, id));
        write_archive(archive_path, files).await
    }

    /// Pages every configured table out of the time-series store. An
    /// incremental backup only exports rows newer than the previous
    /// successful backup of this system.
    async fn export_timeseries(
        &self,
        backup_type: BackupType,
    ) -> Result<Vec<(String, Vec<u8>)>, BackupError> {
        let since: Option<DateTime<Utc>> = match backup_type {
            BackupType::Full => None,
            BackupType::Incremental => self
                .store
                .last_successful_backup(BackupSystem::Timeseries)
                .await
                .map(|b| b.created_at),
        };

        let mut tables: Vec<&str> = self.mappings.iter().map(|m| m.table.as_str()).collect();
        tables.sort_unstable();
        tables.dedup();

        let mut files = Vec::with_capacity(tables.len());
        for table in tables {
            let mut content = Vec::new();
            let mut cursor = since;
            loop {
                let rows = self
                    .page_policy
                    .run("backup export page", || {
                        self.source.fetch_ticks(table, cursor, self.settings.page_size)
                    })
                    .await?;
                let done = rows.len() < self.settings.page_size;
                for tick in &rows {
                    serde_json::to_writer(&mut content, tick)
                        .map_err(|e| BackupError::Archive(e.to_string()))?;
                    content.push(b'\n');
                }
                cursor = rows.last().map(|t| t.timestamp).or(cursor);
                if done {
                    break;
                }
            }
            files.push((format!("{}.jsonl", table), content));
        }
        Ok(files)
    }

    /// Paginated full-collection export of the record store.
    async fn export_records(&self) -> Result<Vec<(String, Vec<u8>)>, BackupError> {
        let mut collections: Vec<&str> =
            self.mappings.iter().map(|m| m.collection.as_str()).collect();
        collections.sort_unstable();
        collections.dedup();

        let per_page = self.settings.page_size.min(u32::MAX as usize) as u32;
        let mut files = Vec::with_capacity(collections.len());
        for collection in collections {
            let mut content = Vec::new();
            let mut page = 1u32;
            loop {
                let batch = self
                    .page_policy
                    .run("backup export page", || self.sink.list_records(collection, page, per_page))
                    .await?;
                for record in &batch.items {
                    serde_json::to_writer(&mut content, record)
                        .map_err(|e| BackupError::Archive(e.to_string()))?;
                    content.push(b'\n');
                }
                if (batch.items.len() as u32) < per_page {
                    break;
                }
                page += 1;
            }
            files.push((format!("{}.jsonl", collection), content));
        }
        Ok(files)
    }

    /// Deletes archives older than the retention window. Backup records stay
    /// append-only; only the files on disk are pruned.
    async fn prune_old_archives(&self) {
        let dir = self.settings.dir.clone();
        let retention = std::time::Duration::from_secs(
            self.settings.retention_days.max(0) as u64 * 24 * 3600,
        );
        let result = tokio::task::spawn_blocking(move || {
            let mut removed = 0usize;
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => return removed,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "zip") {
                    continue;
                }
                let expired = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .is_some_and(|age| age > retention);
                if expired && std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
            removed
        })
        .await;
        match result {
            Ok(0) => {}
            Ok(removed) => log::info!("pruned {} expired backup archives", removed),
            Err(err) => log::error!("archive pruning task failed: {}", err),
        }
    }
}

/// Compresses the export into a zip archive and checksums the content.
///
/// The SHA-256 runs over file names and bytes in deterministic order, before
/// compression, so archive metadata never influences the checksum.
async fn write_archive(
    path: PathBuf,
    files: Vec<(String, Vec<u8>)>,
) -> Result<Artifact, BackupError> {
    tokio::task::spawn_blocking(move || {
        let mut hasher = Sha256::new();
        for (name, content) in &files {
            hasher.update(name.as_bytes());
            hasher.update(content);
        }
        let checksum = hex::encode(hasher.finalize());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&path)?;
        let mut archive = zip::ZipWriter::new(file);
        let options = FileOptions::<'_, ()>::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in &files {
            archive
                .start_file(name.as_str(), options.clone())
                .map_err(|e| BackupError::Archive(e.to_string()))?;
            archive.write_all(content)?;
        }
        archive.finish().map_err(|e| BackupError::Archive(e.to_string()))?;

        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Artifact { path, size_bytes, checksum })
    })
    .await
    .map_err(|e| BackupError::Archive(format!("archive task aborted: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordPage, SinkRecord, Tick};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct MemorySource {
        ticks: Vec<Tick>,
        fail: bool,
    }

    #[async_trait]
    impl TickSource for MemorySource {
        async fn fetch_ticks(
            &self,
            _table: &str,
            since: Option<DateTime<Utc>>,
            limit: usize,
        ) -> Result<Vec<Tick>, SourceError> {
            if self.fail {
                return Err(SourceError::Transport("source offline".into()));
            }
            let mut rows: Vec<Tick> = self
                .ticks
                .iter()
                .filter(|t| since.map_or(true, |s| t.timestamp > s))
                .cloned()
                .collect();
            rows.sort_by_key(|t| t.timestamp);
            rows.truncate(limit);
            Ok(rows)
        }

        async fn count_rows(&self, _table: &str) -> Result<u64, SourceError> {
            Ok(self.ticks.len() as u64)
        }

        async fn ping(&self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<SinkRecord>>,
    }

    #[async_trait]
    impl RecordStore for MemorySink {
        async fn authenticate(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn create_record(&self, _c: &str, r: &SinkRecord) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(r.clone());
            Ok(())
        }

        async fn create_batch(&self, _c: &str, r: &[SinkRecord]) -> Result<(), SinkError> {
            self.records.lock().unwrap().extend_from_slice(r);
            Ok(())
        }

        async fn list_records(
            &self,
            _c: &str,
            page: u32,
            per_page: u32,
        ) -> Result<RecordPage, SinkError> {
            let records = self.records.lock().unwrap();
            let start = ((page - 1) * per_page) as usize;
            let end = (start + per_page as usize).min(records.len());
            let items = if start < records.len() { records[start..end].to_vec() } else { Vec::new() };
            Ok(RecordPage { page, per_page, total_items: records.len() as u64, items })
        }

        async fn count_records(&self, _c: &str) -> Result<u64, SinkError> {
            Ok(self.records.lock().unwrap().len() as u64)
        }
    }

    fn tick(day: u32) -> Tick {
        Tick {
            symbol: "PKN".into(),
            open: 60.0,
            high: 62.0,
            low: 59.0,
            close: 61.0,
            volume: 1000.0,
            macd: None,
            rsi: None,
            bb_upper: None,
            bb_lower: None,
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 17, 0, 0).unwrap(),
        }
    }

    async fn manager(fail_source: bool) -> (BackupManager, Arc<MonitoringStore>, tempfile::TempDir) {
        let data_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MonitoringStore::open(data_dir.path()).await.unwrap());
        let settings = BackupSettings {
            dir: data_dir.path().join("backups"),
            ..BackupSettings::default()
        };
        let manager = BackupManager::new(
            Arc::new(MemorySource { ticks: vec![tick(1), tick(2), tick(3)], fail: fail_source }),
            Arc::new(MemorySink::default()),
            store.clone(),
            settings,
            vec![CollectionMapping { table: "stock_ticks".into(), collection: "ticks".into() }],
        );
        (manager, store, data_dir)
    }

    #[tokio::test]
    async fn successful_backup_produces_archive_and_checksum() {
        let (manager, store, _dir) = manager(false).await;
        let record = manager.backup(BackupSystem::Timeseries, BackupType::Full).await;
        assert_eq!(record.status, BackupStatus::Success);
        assert!(record.size_bytes > 0);
        let path = record.path.as_deref().unwrap();
        assert!(std::path::Path::new(path).exists());
        assert!(record.checksum.is_some());
        // Persisted as the last successful backup for its system.
        let last = store.last_successful_backup(BackupSystem::Timeseries).await.unwrap();
        assert_eq!(last.id, record.id);
    }

    #[tokio::test]
    async fn identical_data_yields_identical_checksums_with_distinct_ids() {
        let (manager, _store, _dir) = manager(false).await;
        let a = manager.backup(BackupSystem::Timeseries, BackupType::Full).await;
        let b = manager.backup(BackupSystem::Timeseries, BackupType::Full).await;
        assert_ne!(a.id, b.id);
        assert_eq!(a.checksum, b.checksum);
        assert!(a.checksum.is_some());
    }

    #[tokio::test]
    async fn failed_export_is_recorded_and_not_retried() {
        let (manager, store, _dir) = manager(true).await;
        let record = manager.backup(BackupSystem::Timeseries, BackupType::Full).await;
        assert_eq!(record.status, BackupStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("source offline"));
        assert!(record.checksum.is_none());
        // The failure is on the record; nothing succeeded.
        assert!(store.last_successful_backup(BackupSystem::Timeseries).await.is_none());
    }

    #[tokio::test]
    async fn auto_trigger_only_when_no_recent_success() {
        let (manager, _store, _dir) = manager(false).await;
        assert!(manager.auto_backup_due(BackupSystem::Timeseries).await);
        manager.backup(BackupSystem::Timeseries, BackupType::Full).await;
        assert!(!manager.auto_backup_due(BackupSystem::Timeseries).await);
        // The other system is still due.
        assert!(manager.auto_backup_due(BackupSystem::Records).await);
    }

    #[tokio::test]
    async fn record_store_export_pages_through_every_record() {
        let data_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MonitoringStore::open(data_dir.path()).await.unwrap());
        let sink = MemorySink::default();
        for day in 1..=5 {
            let record = SinkRecord::from_tick(&tick(day), "PKN Orlen");
            sink.records.lock().unwrap().push(record);
        }
        let settings = BackupSettings {
            dir: data_dir.path().join("backups"),
            page_size: 2,
            ..BackupSettings::default()
        };
        let manager = BackupManager::new(
            Arc::new(MemorySource { ticks: Vec::new(), fail: false }),
            Arc::new(sink),
            store,
            settings,
            vec![CollectionMapping { table: "stock_ticks".into(), collection: "ticks".into() }],
        );
        let record = manager.backup(BackupSystem::Records, BackupType::Full).await;
        assert_eq!(record.status, BackupStatus::Success);
        assert!(record.size_bytes > 0);
    }
}
