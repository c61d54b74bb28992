//! # Tick Providers
//!
//! A provider is one upstream endpoint the poller pulls live ticks from.

use async_trait::async_trait;
use std::time::Duration;

use crate::configs::settings::ProviderSettings;
use crate::models::Tick;

#[async_trait]
pub trait TickProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Sink collection receiving this provider's single-record uploads.
    fn collection(&self) -> &str;
    async fn fetch_ticks(&self) -> anyhow::Result<Vec<Tick>>;
}

/// Polls a REST endpoint returning a JSON array of ticks.
pub struct RestTickProvider {
    name: String,
    collection: String,
    url: String,
    client: reqwest::Client,
}

impl RestTickProvider {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            name: settings.name.clone(),
            collection: settings.collection.clone(),
            url: settings.url.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("TickBridge/1.0")
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl TickProvider for RestTickProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn fetch_ticks(&self) -> anyhow::Result<Vec<Tick>> {
        let ticks = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Tick>>()
            .await?;
        Ok(ticks)
    }
}
