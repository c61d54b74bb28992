//! # Tick Model
//!
//! One OHLCV+indicator observation as produced by the time-series store or a
//! live provider. A `Tick` is immutable once produced; the pipeline
//! transforms valid ticks into sink records and drops invalid ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a tick fails OHLC consistency validation.
///
/// A row failing validation is dropped and counted; it is never retried and
/// never produces a sink record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickValidationError {
    #[error("high {high} is below {field} {value}")]
    HighBelow { field: &'static str, high: f64, value: f64 },
    #[error("low {low} is above {field} {value}")]
    LowAbove { field: &'static str, low: f64, value: f64 },
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: f64 },
    #[error("volume must be non-negative, got {0}")]
    NegativeVolume(f64),
}

/// One timestamped OHLCV observation with optional technical indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub symbol: String,
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
}

impl Tick {
    /// Checks OHLC consistency: `high` must be the ceiling of the bar,
    /// `low` the floor, all prices positive and volume non-negative.
    pub fn validate(&self) -> Result<(), TickValidationError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= 0.0 {
                return Err(TickValidationError::NonPositivePrice { field, value });
            }
        }
        if self.volume < 0.0 {
            return Err(TickValidationError::NegativeVolume(self.volume));
        }
        for (field, value) in [("open", self.open), ("close", self.close), ("low", self.low)] {
            if self.high < value {
                return Err(TickValidationError::HighBelow { field, high: self.high, value });
            }
        }
        for (field, value) in [("open", self.open), ("close", self.close)] {
            if self.low > value {
                return Err(TickValidationError::LowAbove { field, low: self.low, value });
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
