//! # Batch Sync Pipeline
//!
//! Pulls one bounded, time-ordered page from the time-series source,
//! validates and transforms the rows, and uploads them to the record sink in
//! bounded batches with retry. Invalid rows are dropped and counted, never
//! retried. An exhausted batch is marked failed and the run continues; one
//! failing batch never aborts the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::metadata::CompanyDirectory;
use super::watermark::WatermarkStore;
use crate::configs::settings::SyncSettings;
use crate::connections::backoff::BackoffPolicy;
use crate::connections::recordstore::RecordStore;
use crate::connections::tsdb::{SourceError, TickSource};
use crate::models::{SinkRecord, SyncJobStats};

/// One-shot full sync, or incremental sync against the persisted watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

pub struct BatchSyncPipeline {
    source: Arc<dyn TickSource>,
    sink: Arc<dyn RecordStore>,
    watermarks: Arc<WatermarkStore>,
    directory: CompanyDirectory,
    policy: BackoffPolicy,
    page_size: usize,
    upload_batch_size: usize,
}

impl BatchSyncPipeline {
    pub fn new(
        source: Arc<dyn TickSource>,
        sink: Arc<dyn RecordStore>,
        watermarks: Arc<WatermarkStore>,
        directory: CompanyDirectory,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            source,
            sink,
            watermarks,
            directory,
            policy: BackoffPolicy::new(
                settings.max_retries,
                std::time::Duration::from_millis(settings.backoff_base_ms),
            ),
            page_size: settings.page_size,
            upload_batch_size: settings.upload_batch_size.max(1),
        }
    }

    /// Synchronizes one source table into one sink collection and returns the
    /// stats for this run. Only a source fetch failure aborts the run; upload
    /// failures are contained in the stats.
    pub async fn sync_table(
        &self,
        table: &str,
        collection: &str,
        mode: SyncMode,
    ) -> Result<SyncJobStats, SourceError> {
        let mut stats = SyncJobStats::begin();
        let key = WatermarkStore::key(table, collection);
        let since = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => self.watermarks.get(&key).await,
        };

        let ticks = self.source.fetch_ticks(table, since, self.page_size).await?;
        stats.processed = ticks.len() as u64;
        log::info!(
            "sync {} -> {}: fetched {} rows ({:?} mode, since {:?})",
            table,
            collection,
            ticks.len(),
            mode,
            since
        );

        let mut records: Vec<SinkRecord> = Vec::with_capacity(ticks.len());
        for tick in &ticks {
            match tick.validate() {
                Ok(()) => {
                    let company = self.directory.resolve(&tick.symbol);
                    records.push(SinkRecord::from_tick(tick, company));
                }
                Err(reason) => {
                    stats.invalid += 1;
                    log::debug!("dropping invalid row for {}: {}", tick.symbol, reason);
                }
            }
        }

        // Batches upload in source time order. The watermark only advances
        // through the contiguous prefix of successful batches; rows behind a
        // failed batch are re-fetched on the next incremental run.
        let mut advance_to: Option<DateTime<Utc>> = None;
        let mut advance_blocked = false;
        for batch in records.chunks(self.upload_batch_size) {
            let upload = self
                .policy
                .run("batch upload", || self.sink.create_batch(collection, batch))
                .await;
            match upload {
                Ok(()) => {
                    stats.synced += batch.len() as u64;
                    if !advance_blocked {
                        advance_to = batch.iter().map(|r| r.timestamp).max().max(advance_to);
                    }
                }
                Err(err) => {
                    stats.failed += batch.len() as u64;
                    advance_blocked = true;
                    log::error!(
                        "batch of {} records for '{}' exhausted retries: {}",
                        batch.len(),
                        collection,
                        err
                    );
                }
            }
        }

        if let Some(timestamp) = advance_to {
            if let Err(err) = self.watermarks.advance(&key, timestamp).await {
                log::warn!("failed to persist watermark for {}: {}", key, err);
            }
        }

        Ok(stats.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::recordstore::SinkError;
    use crate::models::{RecordPage, Tick};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MemorySource {
        ticks: Vec<Tick>,
    }

    #[async_trait]
    impl TickSource for MemorySource {
        async fn fetch_ticks(
            &self,
            _table: &str,
            since: Option<DateTime<Utc>>,
            limit: usize,
        ) -> Result<Vec<Tick>, SourceError> {
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
        /// Batch uploads rejected before the sink starts accepting.
        fail_batches: AtomicU32,
        batch_calls: AtomicU32,
    }

    #[async_trait]
    impl RecordStore for MemorySink {
        async fn authenticate(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn create_record(
            &self,
            _collection: &str,
            record: &SinkRecord,
        ) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn create_batch(
            &self,
            _collection: &str,
            records: &[SinkRecord],
        ) -> Result<(), SinkError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches.load(Ordering::SeqCst) > 0 {
                self.fail_batches.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::Transport("connection reset".into()));
            }
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        async fn list_records(
            &self,
            _collection: &str,
            page: u32,
            per_page: u32,
        ) -> Result<RecordPage, SinkError> {
            let records = self.records.lock().unwrap();
            Ok(RecordPage {
                page,
                per_page,
                total_items: records.len() as u64,
                items: records.clone(),
            })
        }

        async fn count_records(&self, _collection: &str) -> Result<u64, SinkError> {
            Ok(self.records.lock().unwrap().len() as u64)
        }
    }

    fn tick_at(symbol: &str, day: u32, close: f64) -> Tick {
        Tick {
            symbol: symbol.into(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
            macd: None,
            rsi: None,
            bb_upper: None,
            bb_lower: None,
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 17, 0, 0).unwrap(),
        }
    }

    fn broken_tick(symbol: &str, day: u32) -> Tick {
        // high below low: must never reach the sink.
        Tick { high: 1.0, low: 5.0, ..tick_at(symbol, day, 3.0) }
    }

    fn fast_settings() -> SyncSettings {
        SyncSettings { backoff_base_ms: 1, ..SyncSettings::default() }
    }

    async fn pipeline_with(
        ticks: Vec<Tick>,
        sink: Arc<MemorySink>,
        settings: SyncSettings,
    ) -> (BatchSyncPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let watermarks = Arc::new(WatermarkStore::open(dir.path()).await.unwrap());
        let pipeline = BatchSyncPipeline::new(
            Arc::new(MemorySource { ticks }),
            sink,
            watermarks,
            CompanyDirectory::default(),
            &settings,
        );
        (pipeline, dir)
    }

    #[tokio::test]
    async fn valid_rows_sync_and_invalid_rows_are_dropped() {
        let sink = Arc::new(MemorySink::default());
        let ticks = vec![tick_at("PKN", 1, 60.0), broken_tick("PKN", 1), tick_at("PKN", 2, 61.0)];
        let (pipeline, _dir) = pipeline_with(ticks, sink.clone(), fast_settings()).await;

        let stats = pipeline.sync_table("stock_ticks", "ticks", SyncMode::Full).await.unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.synced, 2);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.failed, 0);

        let uploaded = sink.records.lock().unwrap();
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded.iter().all(|r| r.company == "PKN Orlen"));
    }

    #[tokio::test]
    async fn rerun_after_watermark_advances_syncs_nothing() {
        let sink = Arc::new(MemorySink::default());
        let ticks = vec![tick_at("PKN", 1, 60.0), tick_at("PKN", 2, 61.0)];
        let (pipeline, _dir) = pipeline_with(ticks, sink.clone(), fast_settings()).await;

        let first =
            pipeline.sync_table("stock_ticks", "ticks", SyncMode::Incremental).await.unwrap();
        assert_eq!(first.synced, 2);

        let second =
            pipeline.sync_table("stock_ticks", "ticks", SyncMode::Incremental).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.synced, 0);
        assert_eq!(sink.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_batch_is_counted_failed_and_the_run_continues() {
        let settings = SyncSettings { upload_batch_size: 1, max_retries: 2, ..fast_settings() };
        let sink = Arc::new(MemorySink::default());
        // First batch fails through all its attempts; the second succeeds.
        sink.fail_batches.store(settings.max_retries + 1, Ordering::SeqCst);
        let ticks = vec![tick_at("PKN", 1, 60.0), tick_at("PKN", 2, 61.0)];
        let (pipeline, _dir) = pipeline_with(ticks, sink.clone(), settings.clone()).await;

        let stats = pipeline.sync_table("stock_ticks", "ticks", SyncMode::Full).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.synced, 1);
        // max_retries + 1 attempts for the failing batch, one for the next.
        assert_eq!(sink.batch_calls.load(Ordering::SeqCst), settings.max_retries + 2);
    }

    #[tokio::test]
    async fn watermark_does_not_advance_past_a_failed_batch() {
        let settings = SyncSettings { upload_batch_size: 1, max_retries: 0, ..fast_settings() };
        let sink = Arc::new(MemorySink::default());
        sink.fail_batches.store(1, Ordering::SeqCst);
        let ticks = vec![tick_at("PKN", 1, 60.0), tick_at("PKN", 2, 61.0)];
        let (pipeline, _dir) = pipeline_with(ticks.clone(), sink.clone(), settings).await;

        let stats =
            pipeline.sync_table("stock_ticks", "ticks", SyncMode::Incremental).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.synced, 1);

        // The day-1 row was lost to the failed batch, so the next incremental
        // run must see it again.
        let second =
            pipeline.sync_table("stock_ticks", "ticks", SyncMode::Incremental).await.unwrap();
        assert_eq!(second.processed, 2);
    }
}
