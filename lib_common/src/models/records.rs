//! Sink-side projections of ticks and the per-run sync statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tick::Tick;

/// The record-store shaped projection of one valid [`Tick`].
///
/// Exactly one `SinkRecord` exists per valid tick; a tick that fails
/// validation never produces one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkRecord {
    pub id: String,
    pub symbol: String,
    pub company: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bb_upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bb_lower: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl SinkRecord {
    /// Projects a validated tick into a sink record. The caller resolves the
    /// company name (unknown symbols map to "Unknown").
    pub fn from_tick(tick: &Tick, company: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: tick.symbol.clone(),
            company: company.to_string(),
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.close,
            volume: tick.volume,
            macd: tick.macd,
            rsi: tick.rsi,
            bb_upper: tick.bb_upper,
            bb_lower: tick.bb_lower,
            timestamp: tick.timestamp,
            created: now,
            updated: now,
        }
    }
}

/// One page of a paged record listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub items: Vec<SinkRecord>,
}

/// Statistics for one synchronization run.
///
/// Owned exclusively by the pipeline driving the run and returned to the
/// caller; there are no process-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobStats {
    /// Rows fetched from the source.
    pub processed: u64,
    /// Rows uploaded to the sink.
    pub synced: u64,
    /// Rows lost to batches that exhausted their retries.
    pub failed: u64,
    /// Rows dropped by validation. Never retried.
    pub invalid: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJobStats {
    pub fn begin() -> Self {
        Self {
            processed: 0,
            synced: 0,
            failed: 0,
            invalid: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}
