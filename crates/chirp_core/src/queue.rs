/*
 * SPDX-FileCopyrightText: 2026 Chirp Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

/// One "deliver this event to this user" unit of work. Owned by the queue
/// from enqueue until terminal success or attempt exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub recipient_id: String,
    pub message: String,
    pub attempts_allowed: u32,
    pub attempts_made: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Recipient has no live connection. Terminal, not an error.
    Dropped,
}

/// Delivery seam between the queue workers and the fan-out dispatcher.
/// An `Err(DeliveryFailed)` is transient and retried by the queue.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, job: &NotificationJob) -> Result<DeliveryOutcome>;
}

#[derive(Clone, Copy)]
pub struct QueueSettings {
    pub capacity: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
            max_attempts: 3,
            retry_delay_ms: 200,
        }
    }
}

#[derive(Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped_offline: AtomicU64,
    dead: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub dropped_offline: u64,
    pub dead: u64,
}

/// Bounded-channel work queue with a fixed worker pool. Enqueue is
/// fire-and-forget: the triggering request never blocks on delivery.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationJob>,
    counters: Arc<QueueCounters>,
    max_attempts: u32,
}

impl NotificationQueue {
    pub fn start(
        settings: QueueSettings,
        dispatcher: Arc<dyn Deliver>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(QueueCounters::default());
        for worker in 0..settings.workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                rx.clone(),
                tx.clone(),
                dispatcher.clone(),
                counters.clone(),
                settings,
                shutdown.clone(),
            ));
        }
        Self {
            tx,
            counters,
            max_attempts: settings.max_attempts.max(1),
        }
    }

    pub fn enqueue(&self, recipient_id: impl Into<String>, message: impl Into<String>) {
        let job = NotificationJob {
            recipient_id: recipient_id.into(),
            message: message.into(),
            attempts_allowed: self.max_attempts,
            attempts_made: 0,
        };
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.tx.try_send(job).is_err() {
            warn!("notification queue full, job dropped");
            self.counters.dead.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped_offline: self.counters.dropped_offline.load(Ordering::Relaxed),
            dead: self.counters.dead.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    retry_tx: mpsc::Sender<NotificationJob>,
    dispatcher: Arc<dyn Deliver>,
    counters: Arc<QueueCounters>,
    settings: QueueSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        // Hold the receiver lock only while waiting; delivery runs unlocked
        // so the pool drains concurrently.
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                job = rx.recv() => job,
                _ = shutdown.changed() => None,
            }
        };
        let Some(mut job) = job else {
            break;
        };

        job.attempts_made = job.attempts_made.saturating_add(1);
        match dispatcher.deliver(&job).await {
            Ok(DeliveryOutcome::Delivered) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(DeliveryOutcome::Dropped) => {
                counters.dropped_offline.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if job.attempts_made >= job.attempts_allowed {
                    warn!(
                        recipient = %job.recipient_id,
                        attempts = job.attempts_made,
                        "notification dropped after retries: {e}"
                    );
                    counters.dead.fetch_add(1, Ordering::Relaxed);
                } else {
                    debug!(
                        worker,
                        recipient = %job.recipient_id,
                        attempt = job.attempts_made,
                        "delivery failed, rescheduling: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(settings.retry_delay_ms)).await;
                    if retry_tx.try_send(job).is_err() {
                        warn!("notification queue full, retry dropped");
                        counters.dead.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::AtomicU32;

    struct Flaky {
        calls: AtomicU32,
        succeed_after: u32,
    }

    #[async_trait]
    impl Deliver for Flaky {
        async fn deliver(&self, job: &NotificationJob) -> Result<DeliveryOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(job.attempts_made <= job.attempts_allowed);
            if call > self.succeed_after {
                Ok(DeliveryOutcome::Delivered)
            } else {
                Err(CoreError::DeliveryFailed("transport closed".to_string()))
            }
        }
    }

    fn settings() -> QueueSettings {
        QueueSettings {
            capacity: 16,
            workers: 2,
            max_attempts: 3,
            retry_delay_ms: 5,
        }
    }

    async fn drain(queue: &NotificationQueue, done: impl Fn(&QueueStats) -> bool) -> QueueStats {
        for _ in 0..100 {
            let stats = queue.stats();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue.stats()
    }

    #[tokio::test]
    async fn attempts_never_exceed_the_cap() {
        let dispatcher = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = NotificationQueue::start(settings(), dispatcher.clone(), shutdown_rx);

        queue.enqueue("alice", "bob liked your tweet!");
        let stats = drain(&queue, |s| s.dead == 1).await;
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_to_success() {
        let dispatcher = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_after: 1,
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = NotificationQueue::start(settings(), dispatcher.clone(), shutdown_rx);

        queue.enqueue("alice", "bob commented on your tweet.");
        let stats = drain(&queue, |s| s.delivered == 1).await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dead, 0);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_drains_many_jobs() {
        let dispatcher = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_after: 0,
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = NotificationQueue::start(settings(), dispatcher, shutdown_rx);

        for n in 0..10 {
            queue.enqueue("alice", format!("event {n}"));
        }
        let stats = drain(&queue, |s| s.delivered == 10).await;
        assert_eq!(stats.delivered, 10);
        assert_eq!(stats.enqueued, 10);
    }

    #[tokio::test]
    async fn shutdown_stops_workers() {
        let dispatcher = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_after: 0,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = NotificationQueue::start(settings(), dispatcher.clone(), shutdown_rx);
        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.enqueue("alice", "too late");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }
}
