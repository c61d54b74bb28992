//! # Watermark Store
//!
//! Persists, per synchronized table/collection pair, the timestamp of the
//! last successfully uploaded row, so incremental runs never resync
//! unchanged data. Backed by one JSON file in the data directory.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub struct WatermarkStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl WatermarkStore {
    /// Opens (or initializes) the watermark file inside `data_dir`.
    pub async fn open(data_dir: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join("watermarks.json");
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    pub fn key(table: &str, collection: &str) -> String {
        format!("{}/{}", table, collection)
    }

    pub async fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(key).copied()
    }

    /// Advances the watermark for `key` and persists the whole map. The
    /// watermark never moves backwards.
    pub async fn advance(&self, key: &str, timestamp: DateTime<Utc>) -> io::Result<()> {
        let snapshot = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(key.to_string()).or_insert(timestamp);
            if timestamp > *entry {
                *entry = timestamp;
            }
            entries.clone()
        };
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.path, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn watermarks_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = WatermarkStore::key("stock_ticks", "ticks");
        let ts = Utc.with_ymd_and_hms(2024, 3, 2, 17, 0, 0).unwrap();
        {
            let store = WatermarkStore::open(dir.path()).await.unwrap();
            store.advance(&key, ts).await.unwrap();
        }
        let reopened = WatermarkStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&key).await, Some(ts));
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::open(dir.path()).await.unwrap();
        let key = WatermarkStore::key("stock_ticks", "ticks");
        let newer = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        store.advance(&key, newer).await.unwrap();
        store.advance(&key, older).await.unwrap();
        assert_eq!(store.get(&key).await, Some(newer));
    }

    #[tokio::test]
    async fn missing_key_has_no_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("absent/none").await, None);
    }
}
