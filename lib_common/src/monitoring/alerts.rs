//! # Alert Dispatcher
//!
//! Turns threshold breaches into severity-tagged alerts. An alert is
//! persisted to the monitoring store before any delivery is attempted;
//! delivery to the configured webhook and mail-relay channels is asynchronous
//! and best-effort: a delivery failure is logged and never loses the
//! persisted alert. Identical (component, message) pairs are raised at most
//! once per monitoring cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use super::store::{MonitoringStore, StoreError};
use crate::configs::settings::AlertSettings;
use crate::models::{Alert, AlertSeverity};

pub struct AlertDispatcher {
    store: Arc<MonitoringStore>,
    settings: AlertSettings,
    client: reqwest::Client,
    /// (component, message) pairs already raised this cycle.
    seen: Mutex<HashSet<(String, String)>>,
}

impl AlertDispatcher {
    pub fn new(store: Arc<MonitoringStore>, settings: AlertSettings) -> Self {
        Self {
            store,
            settings,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("TickBridge/1.0")
                .build()
                .unwrap_or_default(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Resets the per-cycle dedup window. Called at the top of every
    /// monitoring cycle.
    pub fn begin_cycle(&self) {
        self.seen.lock().expect("alert dedup lock poisoned").clear();
    }

    /// Raises one alert. Returns `None` when the same (component, message)
    /// was already raised this cycle, or when persisting failed.
    pub async fn raise(
        &self,
        severity: AlertSeverity,
        component: &str,
        message: &str,
    ) -> Option<Alert> {
        {
            let mut seen = self.seen.lock().expect("alert dedup lock poisoned");
            if !seen.insert((component.to_string(), message.to_string())) {
                log::debug!("suppressing duplicate alert for {}: {}", component, message);
                return None;
            }
        }

        let alert = Alert::new(severity, component, message);
        log::warn!("[{}] alert for {}: {}", severity, component, message);

        // Persist first; delivery must never be able to lose the alert.
        if let Err(err) = self.store.append_alert(&alert).await {
            log::error!("failed to persist alert for {}: {}", component, err);
            return None;
        }

        self.spawn_delivery(alert.clone());
        Some(alert)
    }

    pub async fn acknowledge(&self, id: &str) -> Result<Alert, StoreError> {
        self.store.acknowledge_alert(id).await
    }

    pub async fn resolve(&self, id: &str) -> Result<Alert, StoreError> {
        self.store.resolve_alert(id).await
    }

    fn spawn_delivery(&self, alert: Alert) {
        if self.settings.webhooks.is_empty() && self.settings.mail_relay_url.is_none() {
            return;
        }
        let client = self.client.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            deliver(client, settings, alert).await;
        });
    }
}

/// Best-effort fan-out to every configured channel.
async fn deliver(client: reqwest::Client, settings: AlertSettings, alert: Alert) {
    let payload = serde_json::json!({
        "id": alert.id,
        "date": alert.created_at.to_rfc3339(),
        "severity": alert.severity,
        "component": alert.component,
        "message": alert.message,
    });

    for webhook in &settings.webhooks {
        match client.post(webhook).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("alert {} delivered to webhook {}", alert.id, webhook);
            }
            Ok(response) => {
                log::error!(
                    "webhook {} rejected alert {}: status {}",
                    webhook,
                    alert.id,
                    response.status()
                );
            }
            Err(err) => {
                log::error!("webhook {} unreachable for alert {}: {}", webhook, alert.id, err);
            }
        }
    }

    if let Some(relay) = &settings.mail_relay_url {
        let mail = serde_json::json!({
            "to": settings.mail_to,
            "subject": format!("[{}] {} alert", alert.severity, alert.component),
            "body": alert.message,
            "alert": payload,
        });
        match client.post(relay).json(&mail).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("alert {} handed to mail relay", alert.id);
            }
            Ok(response) => {
                log::error!("mail relay rejected alert {}: status {}", alert.id, response.status());
            }
            Err(err) => {
                log::error!("mail relay unreachable for alert {}: {}", alert.id, err);
            }
        }
    }
}
