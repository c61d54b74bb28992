//! In-memory fakes of the time-series source and the record sink, with
//! scriptable failures for retry and reconnect scenarios.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use lib_common::connections::recordstore::{RecordStore, SinkError};
use lib_common::connections::tsdb::{SourceError, TickSource};
use lib_common::models::{RecordPage, SinkRecord, Tick};

/// A consistent OHLC bar for `symbol` closing at `close` on the given day.
pub fn tick_on_day(symbol: &str, day: u32, close: f64) -> Tick {
    Tick {
        symbol: symbol.into(),
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000.0,
        macd: Some(0.2),
        rsi: Some(55.0),
        bb_upper: None,
        bb_lower: None,
        timestamp: Utc.with_ymd_and_hms(2024, 3, day, 17, 0, 0).unwrap(),
    }
}

/// A bar that fails OHLC validation (high below low).
pub fn invalid_tick(symbol: &str, day: u32) -> Tick {
    Tick { high: 1.0, low: 9.0, ..tick_on_day(symbol, day, 5.0) }
}

/// In-memory time-series store.
pub struct MemoryTickSource {
    ticks: Mutex<Vec<Tick>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MemoryTickSource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks: Mutex::new(ticks), fail: std::sync::atomic::AtomicBool::new(false) }
    }

    pub fn push(&self, tick: Tick) {
        self.ticks.lock().unwrap().push(tick);
    }
}

#[async_trait]
impl TickSource for MemoryTickSource {
    async fn fetch_ticks(
        &self,
        _table: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Tick>, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("source offline".into()));
        }
        let mut rows: Vec<Tick> = self
            .ticks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| since.map_or(true, |s| t.timestamp > s))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.timestamp);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_rows(&self, _table: &str) -> Result<u64, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("source offline".into()));
        }
        Ok(self.ticks.lock().unwrap().len() as u64)
    }

    async fn ping(&self) -> Result<(), SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("source offline".into()));
        }
        Ok(())
    }
}

/// In-memory record sink with scriptable batch failures.
#[derive(Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<(String, SinkRecord)>>,
    /// Batch uploads rejected before the sink starts accepting again.
    pub fail_next_batches: AtomicU32,
    pub batch_calls: AtomicU32,
    pub auth_calls: AtomicU32,
}

impl MemoryRecordSink {
    pub fn records_in(&self, collection: &str) -> Vec<SinkRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordSink {
    async fn authenticate(&self) -> Result<(), SinkError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_record(&self, collection: &str, record: &SinkRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push((collection.to_string(), record.clone()));
        Ok(())
    }

    async fn create_batch(
        &self,
        collection: &str,
        records: &[SinkRecord],
    ) -> Result<(), SinkError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_batches.load(Ordering::SeqCst) > 0 {
            self.fail_next_batches.fetch_sub(1, Ordering::SeqCst);
            return Err(SinkError::Transport("connection reset".into()));
        }
        let mut store = self.records.lock().unwrap();
        for record in records {
            store.push((collection.to_string(), record.clone()));
        }
        Ok(())
    }

    async fn list_records(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RecordPage, SinkError> {
        let all = self.records_in(collection);
        let start = ((page.saturating_sub(1)) * per_page) as usize;
        let end = (start + per_page as usize).min(all.len());
        let items = if start < all.len() { all[start..end].to_vec() } else { Vec::new() };
        Ok(RecordPage { page, per_page, total_items: all.len() as u64, items })
    }

    async fn count_records(&self, collection: &str) -> Result<u64, SinkError> {
        Ok(self.records_in(collection).len() as u64)
    }
}
