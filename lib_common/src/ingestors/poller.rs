//! # Poller
//!
//! On a fixed interval, pulls live ticks from every registered provider,
//! pushes each valid tick through the single-record validate/upload path, and
//! hands the batch to the broadcaster. Per-provider errors are contained;
//! one failing provider never stops the cycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::providers::TickProvider;
use crate::connections::recordstore::RecordStore;
use crate::core::broadcaster::StreamBroadcaster;
use crate::models::{SinkRecord, Tick};
use crate::sync::metadata::CompanyDirectory;

pub struct Poller {
    providers: Vec<Arc<dyn TickProvider>>,
    sink: Arc<dyn RecordStore>,
    broadcaster: Arc<StreamBroadcaster>,
    directory: CompanyDirectory,
    interval: Duration,
}

impl Poller {
    pub fn new(
        providers: Vec<Arc<dyn TickProvider>>,
        sink: Arc<dyn RecordStore>,
        broadcaster: Arc<StreamBroadcaster>,
        directory: CompanyDirectory,
        interval: Duration,
    ) -> Self {
        Self { providers, sink, broadcaster, directory, interval }
    }

    /// Main execution loop; one cooperative task per process.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("poller received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One polling pass over all providers. Returns the number of valid
    /// ticks handed to the broadcaster.
    pub async fn poll_once(&self) -> usize {
        let mut broadcast_total = 0;
        for provider in &self.providers {
            match provider.fetch_ticks().await {
                Ok(ticks) => {
                    let valid = self.upload_batch(provider.as_ref(), ticks).await;
                    broadcast_total += valid.len();
                    self.broadcaster.broadcast(&valid).await;
                }
                Err(err) => {
                    log::error!("provider '{}' poll failed: {}", provider.name(), err);
                }
            }
        }
        broadcast_total
    }

    async fn upload_batch(&self, provider: &dyn TickProvider, ticks: Vec<Tick>) -> Vec<Tick> {
        let mut valid = Vec::with_capacity(ticks.len());
        for tick in ticks {
            if let Err(reason) = tick.validate() {
                log::debug!(
                    "provider '{}' produced invalid tick for {}: {}",
                    provider.name(),
                    tick.symbol,
                    reason
                );
                continue;
            }
            let record = SinkRecord::from_tick(&tick, self.directory.resolve(&tick.symbol));
            if let Err(err) = self.sink.create_record(provider.collection(), &record).await {
                // Contained: the tick still reaches subscribers, the sink gap
                // shows up in the next integrity check.
                log::warn!(
                    "single-record upload to '{}' failed: {}",
                    provider.collection(),
                    err
                );
            }
            valid.push(tick);
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::recordstore::SinkError;
    use crate::models::RecordPage;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct StaticProvider {
        ticks: Vec<Tick>,
    }

    #[async_trait]
    impl TickProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn collection(&self) -> &str {
            "live_ticks"
        }

        async fn fetch_ticks(&self) -> anyhow::Result<Vec<Tick>> {
            Ok(self.ticks.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TickProvider for FailingProvider {
        fn name(&self) -> &str {
            "down"
        }

        fn collection(&self) -> &str {
            "live_ticks"
        }

        async fn fetch_ticks(&self) -> anyhow::Result<Vec<Tick>> {
            anyhow::bail!("upstream unreachable")
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<(String, SinkRecord)>>,
    }

    #[async_trait]
    impl RecordStore for MemorySink {
        async fn authenticate(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn create_record(
            &self,
            collection: &str,
            record: &SinkRecord,
        ) -> Result<(), SinkError> {
            self.records.lock().unwrap().push((collection.to_string(), record.clone()));
            Ok(())
        }

        async fn create_batch(
            &self,
            _collection: &str,
            _records: &[SinkRecord],
        ) -> Result<(), SinkError> {
            Ok(())
        }

        async fn list_records(
            &self,
            _collection: &str,
            page: u32,
            per_page: u32,
        ) -> Result<RecordPage, SinkError> {
            Ok(RecordPage { page, per_page, total_items: 0, items: Vec::new() })
        }

        async fn count_records(&self, _collection: &str) -> Result<u64, SinkError> {
            Ok(self.records.lock().unwrap().len() as u64)
        }
    }

    fn tick(symbol: &str, close: f64) -> Tick {
        Tick {
            symbol: symbol.into(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            macd: None,
            rsi: None,
            bb_upper: None,
            bb_lower: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn valid_ticks_are_uploaded_and_broadcast() {
        let bad = Tick { high: 1.0, low: 9.0, ..tick("BAD", 5.0) };
        let provider = Arc::new(StaticProvider { ticks: vec![tick("PKN", 60.0), bad] });
        let sink = Arc::new(MemorySink::default());
        let broadcaster =
            Arc::new(StreamBroadcaster::new(Duration::from_millis(100), 8));
        let (_id, mut rx) = broadcaster.subscribe();

        let poller = Poller::new(
            vec![provider],
            sink.clone(),
            broadcaster,
            CompanyDirectory::default(),
            Duration::from_secs(30),
        );
        let delivered = poller.poll_once().await;
        assert_eq!(delivered, 1);

        let uploaded = sink.records.lock().unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].0, "live_ticks");
        assert_eq!(uploaded[0].1.symbol, "PKN");
        drop(uploaded);

        let frame: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_provider_does_not_stop_the_cycle() {
        let sink = Arc::new(MemorySink::default());
        let broadcaster =
            Arc::new(StreamBroadcaster::new(Duration::from_millis(100), 8));
        let poller = Poller::new(
            vec![
                Arc::new(FailingProvider),
                Arc::new(StaticProvider { ticks: vec![tick("KGH", 120.0)] }),
            ],
            sink.clone(),
            broadcaster,
            CompanyDirectory::default(),
            Duration::from_secs(30),
        );
        let delivered = poller.poll_once().await;
        assert_eq!(delivered, 1);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }
}
