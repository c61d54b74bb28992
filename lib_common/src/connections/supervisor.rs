//! # Connection Supervisor
//!
//! Generic reconnect/backoff state machine wrapping one remote endpoint.
//! Each supervisor instance owns its endpoint's [`ConnectionState`]
//! exclusively; no other component mutates it. On an unexpected disconnect
//! the supervisor retries with capped exponential backoff up to a configured
//! number of attempts, then parks the endpoint in `Failed` and raises exactly
//! one failure alert through the installed hook.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::sleep;

use super::backoff::BackoffPolicy;
use crate::configs::settings::ConnectionSettings;
use crate::models::ConnectionState;

/// A probe establishing (or re-establishing) the underlying connection.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(), String>;
}

type DisconnectHandler = Box<dyn Fn(&str) + Send + Sync>;
type FailureHook = Box<dyn Fn(&str, &str) + Send + Sync>;

pub struct ConnectionSupervisor {
    endpoint: String,
    connector: Arc<dyn Connector>,
    policy: BackoffPolicy,
    max_attempts: u32,
    attempt: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    on_disconnect: Mutex<Vec<DisconnectHandler>>,
    failure_hook: Mutex<Option<FailureHook>>,
}

impl ConnectionSupervisor {
    pub fn new(
        endpoint: &str,
        connector: Arc<dyn Connector>,
        settings: &ConnectionSettings,
    ) -> Self {
        let policy = BackoffPolicy {
            max_retries: settings.max_attempts.saturating_sub(1),
            base_delay: std::time::Duration::from_millis(settings.base_delay_ms),
            multiplier: 2.0,
            max_delay: std::time::Duration::from_millis(settings.max_delay_ms),
        };
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint: endpoint.to_string(),
            connector,
            policy,
            max_attempts: settings.max_attempts,
            attempt: AtomicU32::new(0),
            state_tx,
            state_rx,
            on_disconnect: Mutex::new(Vec::new()),
            failure_hook: Mutex::new(None),
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Registers a handler invoked on every unexpected disconnect.
    pub fn on_disconnect(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.on_disconnect
            .lock()
            .expect("disconnect handler lock poisoned")
            .push(Box::new(handler));
    }

    /// Installs the hook receiving the single (component, message) alert
    /// raised when reconnection is exhausted.
    pub fn set_failure_hook(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.failure_hook.lock().expect("failure hook lock poisoned") = Some(Box::new(hook));
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_rx.borrow() != state {
            log::info!("endpoint '{}' transitioning to {}", self.endpoint, state);
        }
        let _ = self.state_tx.send(state);
    }

    /// Initial connection attempt. `Connected` on success, `Error` otherwise;
    /// an initial failure does not consume reconnect attempts.
    pub async fn connect(&self) -> ConnectionState {
        self.set_state(ConnectionState::Connecting);
        match self.connector.connect().await {
            Ok(()) => {
                self.attempt.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
            }
            Err(err) => {
                log::error!("endpoint '{}' initial connect failed: {}", self.endpoint, err);
                self.set_state(ConnectionState::Error);
            }
        }
        self.current_state()
    }

    /// Signals an unexpected disconnect and drives the reconnect loop.
    ///
    /// Retries up to the configured attempt budget with exponential backoff;
    /// a successful reconnect resets the counter and resumes paused
    /// consumers. Exhaustion parks the endpoint in `Failed` and fires the
    /// failure hook once. A supervisor already in `Failed` stays there until
    /// `connect()` is called again.
    pub async fn record_disconnect(&self) {
        if self.current_state() == ConnectionState::Failed {
            return;
        }
        {
            let handlers = self.on_disconnect.lock().expect("disconnect handler lock poisoned");
            for handler in handlers.iter() {
                handler(&self.endpoint);
            }
        }
        self.set_state(ConnectionState::Reconnecting);

        loop {
            let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.max_attempts {
                break;
            }
            sleep(self.policy.delay_for(attempt - 1)).await;
            log::info!(
                "endpoint '{}' reconnect attempt {}/{}",
                self.endpoint,
                attempt,
                self.max_attempts
            );
            match self.connector.connect().await {
                Ok(()) => {
                    self.attempt.store(0, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    return;
                }
                Err(err) => {
                    log::warn!(
                        "endpoint '{}' reconnect attempt {} failed: {}",
                        self.endpoint,
                        attempt,
                        err
                    );
                }
            }
        }

        self.set_state(ConnectionState::Failed);
        let hook = self.failure_hook.lock().expect("failure hook lock poisoned");
        if let Some(hook) = hook.as_ref() {
            hook(
                &self.endpoint,
                &format!(
                    "connection failed after {} reconnect attempts; operator action required",
                    self.max_attempts
                ),
            );
        }
    }

    /// Parks the caller until the endpoint is `Connected` again. Consumers
    /// paused here are resumed by a successful reconnect.
    pub async fn wait_until_connected(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow() == ConnectionState::Connected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
