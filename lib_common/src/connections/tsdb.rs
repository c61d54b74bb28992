//! # Time-Series Store Client
//!
//! Read-only client for the time-series market-data store (the source of
//! truth). Rows are fetched through the store's HTTP query endpoint
//! (`GET /exec?query=…`) with basic-credential auth, decoded from the
//! column/dataset response shape into [`Tick`]s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::configs::settings::SourceSettings;
use crate::models::Tick;
use crate::retrieve::ApiClient;

/// Errors from the time-series source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level failure; retried with backoff by callers.
    #[error("source transport error: {0}")]
    Transport(String),
    /// Non-2xx from the query endpoint.
    #[error("source query failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response did not match the expected column/dataset shape.
    #[error("source row decode error: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Transport(_) => true,
            SourceError::Status { status, .. } => *status >= 500,
            SourceError::Decode(_) => false,
        }
    }
}

/// Read-only access to the time-series store.
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Fetches up to `limit` rows from `table`, ordered by time, optionally
    /// restricted to rows strictly after `since`.
    async fn fetch_ticks(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Tick>, SourceError>;

    /// Independent row count for one table.
    async fn count_rows(&self, table: &str) -> Result<u64, SourceError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), SourceError>;
}

#[derive(Debug, Deserialize)]
struct ExecColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    columns: Vec<ExecColumn>,
    dataset: Vec<Vec<serde_json::Value>>,
}

/// HTTP client for the time-series store query endpoint.
pub struct TsdbClient {
    api: ApiClient,
}

impl TsdbClient {
    pub fn new(settings: &SourceSettings) -> anyhow::Result<Self> {
        let mut api = ApiClient::new(&settings.base_url, 3)?;
        if let Some(user) = &settings.username {
            api = api.with_basic_auth(user.clone(), settings.password.clone());
        }
        Ok(Self { api })
    }

    async fn exec(&self, query: String) -> Result<ExecResponse, SourceError> {
        let response = self
            .api
            .get::<ExecResponse>("exec", &[("query", query)], None)
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        if !response.success {
            return Err(SourceError::Status {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }
        response
            .data
            .ok_or_else(|| SourceError::Decode("empty query response".into()))
    }

    fn decode_rows(response: ExecResponse) -> Result<Vec<Tick>, SourceError> {
        let index_of = |name: &str| -> Option<usize> {
            response.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
        };
        let required = |name: &'static str| -> Result<usize, SourceError> {
            index_of(name).ok_or_else(|| SourceError::Decode(format!("missing column {}", name)))
        };

        let symbol_idx = required("symbol")?;
        let open_idx = required("open")?;
        let high_idx = required("high")?;
        let low_idx = required("low")?;
        let close_idx = required("close")?;
        let volume_idx = required("volume")?;
        let ts_idx = required("timestamp")?;
        let macd_idx = index_of("macd");
        let rsi_idx = index_of("rsi");
        let bb_upper_idx = index_of("bb_upper");
        let bb_lower_idx = index_of("bb_lower");

        let number = |row: &[serde_json::Value], idx: usize, name: &str| -> Result<f64, SourceError> {
            row.get(idx)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| SourceError::Decode(format!("non-numeric {}", name)))
        };
        let optional = |row: &[serde_json::Value], idx: Option<usize>| -> Option<f64> {
            idx.and_then(|i| row.get(i)).and_then(|v| v.as_f64())
        };

        let mut ticks = Vec::with_capacity(response.dataset.len());
        for row in &response.dataset {
            let symbol = row
                .get(symbol_idx)
                .and_then(|v| v.as_str())
                .ok_or_else(|| SourceError::Decode("non-string symbol".into()))?
                .to_string();
            let raw_ts = row
                .get(ts_idx)
                .and_then(|v| v.as_str())
                .ok_or_else(|| SourceError::Decode("non-string timestamp".into()))?;
            let timestamp = DateTime::parse_from_rfc3339(raw_ts)
                .map_err(|e| SourceError::Decode(format!("bad timestamp '{}': {}", raw_ts, e)))?
                .with_timezone(&Utc);

            ticks.push(Tick {
                symbol,
                open: number(row, open_idx, "open")?,
                high: number(row, high_idx, "high")?,
                low: number(row, low_idx, "low")?,
                close: number(row, close_idx, "close")?,
                volume: number(row, volume_idx, "volume")?,
                macd: optional(row, macd_idx),
                rsi: optional(row, rsi_idx),
                bb_upper: optional(row, bb_upper_idx),
                bb_lower: optional(row, bb_lower_idx),
                timestamp,
            });
        }
        Ok(ticks)
    }
}

#[async_trait]
impl super::supervisor::Connector for TsdbClient {
    async fn connect(&self) -> Result<(), String> {
        self.ping().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl TickSource for TsdbClient {
    async fn fetch_ticks(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Tick>, SourceError> {
        let mut query = format!("SELECT * FROM \"{}\"", table);
        if let Some(since) = since {
            query.push_str(&format!(" WHERE timestamp > '{}'", since.to_rfc3339()));
        }
        query.push_str(&format!(" ORDER BY timestamp ASC LIMIT {}", limit));

        let response = self.exec(query).await?;
        Self::decode_rows(response)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, SourceError> {
        let response = self.exec(format!("SELECT count() FROM \"{}\"", table)).await?;
        response
            .dataset
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SourceError::Decode("count query returned no rows".into()))
    }

    async fn ping(&self) -> Result<(), SourceError> {
        self.exec("SELECT 1".to_string()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_response(json: serde_json::Value) -> ExecResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn decodes_rows_by_column_name() {
        let response = exec_response(serde_json::json!({
            "columns": [
                {"name": "symbol", "type": "SYMBOL"},
                {"name": "open", "type": "DOUBLE"},
                {"name": "high", "type": "DOUBLE"},
                {"name": "low", "type": "DOUBLE"},
                {"name": "close", "type": "DOUBLE"},
                {"name": "volume", "type": "DOUBLE"},
                {"name": "rsi", "type": "DOUBLE"},
                {"name": "timestamp", "type": "TIMESTAMP"}
            ],
            "dataset": [
                ["PKN", 60.0, 62.5, 59.1, 61.8, 120000.0, 61.0, "2024-03-01T09:30:00Z"]
            ]
        }));
        let ticks = TsdbClient::decode_rows(response).unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "PKN");
        assert_eq!(ticks[0].rsi, Some(61.0));
        assert_eq!(ticks[0].macd, None);
    }

    #[test]
    fn missing_required_column_is_a_decode_error() {
        let response = exec_response(serde_json::json!({
            "columns": [{"name": "symbol", "type": "SYMBOL"}],
            "dataset": []
        }));
        let err = TsdbClient::decode_rows(response).unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn transport_errors_are_transient_and_client_errors_are_not() {
        assert!(SourceError::Transport("timeout".into()).is_transient());
        assert!(SourceError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!SourceError::Status { status: 400, body: String::new() }.is_transient());
    }
}
