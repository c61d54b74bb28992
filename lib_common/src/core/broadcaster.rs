//! # Stream Broadcaster
//!
//! Fan-out of live tick batches to subscribed clients.
//!
//! The batch is serialized once and shared as an `Arc<str>`; each subscriber
//! owns a bounded channel drained by its connection task. Sends race a
//! per-subscriber timeout, so one unresponsive subscriber can fill its own
//! buffer and get dropped without ever blocking delivery to the others.
//! Frames stay FIFO per subscriber; there is no cross-subscriber ordering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::models::Tick;

/// A serialized push frame shared across all subscribers.
pub type Frame = std::sync::Arc<str>;

struct Subscriber {
    id: usize,
    tx: mpsc::Sender<Frame>,
}

/// Result of one fan-out pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Subscribers removed because their send timed out or their channel closed.
    pub dropped: Vec<usize>,
}

pub struct StreamBroadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicUsize,
    send_timeout: Duration,
    buffer: usize,
}

impl StreamBroadcaster {
    pub fn new(send_timeout: Duration, buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            send_timeout,
            buffer: buffer.max(1),
        }
    }

    /// Registers a new subscriber and returns its id plus the receiving end
    /// of its frame channel.
    pub fn subscribe(&self) -> (usize, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(Subscriber { id, tx });
        log::info!("subscriber {} registered", id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: usize) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|s| s.id != id);
        log::info!("subscriber {} removed", id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock poisoned").len()
    }

    /// Serializes `ticks` once and fans the frame out concurrently.
    ///
    /// Unresponsive subscribers (send timed out or receiver gone) are
    /// detected and removed; everyone else receives the frame within the
    /// per-subscriber timeout.
    pub async fn broadcast(&self, ticks: &[Tick]) -> BroadcastOutcome {
        if ticks.is_empty() {
            return BroadcastOutcome::default();
        }
        let payload = serde_json::json!({ "type": "stock_updates", "data": ticks });
        let frame: Frame = payload.to_string().into();

        let snapshot: Vec<(usize, mpsc::Sender<Frame>)> = {
            let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
            subscribers.iter().map(|s| (s.id, s.tx.clone())).collect()
        };
        if snapshot.is_empty() {
            return BroadcastOutcome::default();
        }

        let send_timeout = self.send_timeout;
        let sends = snapshot.into_iter().map(|(id, tx)| {
            let frame = frame.clone();
            async move {
                match timeout(send_timeout, tx.send(frame)).await {
                    Ok(Ok(())) => (id, true),
                    // Elapsed or receiver dropped: either way the subscriber
                    // is not keeping up.
                    _ => (id, false),
                }
            }
        });
        let results = futures_util::future::join_all(sends).await;

        let mut outcome = BroadcastOutcome::default();
        for (id, ok) in results {
            if ok {
                outcome.delivered += 1;
            } else {
                outcome.dropped.push(id);
            }
        }
        if !outcome.dropped.is_empty() {
            log::warn!("dropping unresponsive subscribers: {:?}", outcome.dropped);
            let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
            subscribers.retain(|s| !outcome.dropped.contains(&s.id));
        }
        outcome
    }
}
