//! Completion handling for issued sends.
//!
//! Every issued send gets exactly one [`CompletionHandler`], consumed by the
//! task that observes the backend reply. Handlers run concurrently with the
//! producer loop, so all shared state here is atomic.
//!
//! A failure under the fatal policy is never raised on the completion task.
//! It is sent to the producer over an unbounded channel and surfaced by the
//! next `push`.

use crate::delivery::DeliveryMode;
use crate::error::{ProducerError, ProducerResult};
use crate::retry::ErrorPolicy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::error;

/// Counts events and reports the mean rate since creation.
#[derive(Debug)]
pub struct RateMeter {
    count: AtomicU64,
    started: Instant,
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn mark(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Events per second since the meter was created.
    pub fn mean_rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of sends issued but not yet completed.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until nothing is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.get() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Process-wide delivery accounting.
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    succeeded_count: AtomicU64,
    failed_count: AtomicU64,
    succeeded_meter: RateMeter,
    failed_meter: RateMeter,
    in_flight: InFlight,
}

impl ProducerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded_count.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed_count.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub(crate) fn record_success(&self) {
        self.succeeded_count.fetch_add(1, Ordering::SeqCst);
        self.succeeded_meter.mark();
    }

    pub(crate) fn record_failure(&self) {
        self.failed_count.fetch_add(1, Ordering::SeqCst);
        self.failed_meter.mark();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            succeeded: self.succeeded(),
            failed: self.failed(),
            succeeded_per_sec: self.succeeded_meter.mean_rate(),
            failed_per_sec: self.failed_meter.mean_rate(),
            in_flight: self.in_flight.get(),
        }
    }
}

/// Point-in-time view of [`ProducerMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub succeeded_per_sec: f64,
    pub failed_per_sec: f64,
    pub in_flight: usize,
}

/// An asynchronous failure the producer must escalate.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub mode: DeliveryMode,
    pub channel: String,
    pub error: String,
}

impl From<DeliveryFailure> for ProducerError {
    fn from(failure: DeliveryFailure) -> Self {
        ProducerError::AsyncDelivery {
            mode: failure.mode,
            channel: failure.channel,
            message: failure.error,
        }
    }
}

/// Terminal outcome handling for a single issued send.
#[derive(Debug)]
pub struct CompletionHandler {
    mode: DeliveryMode,
    channel: String,
    payload: String,
    metrics: Arc<ProducerMetrics>,
    policy: ErrorPolicy,
    escalations: mpsc::UnboundedSender<DeliveryFailure>,
}

impl CompletionHandler {
    pub fn new(
        mode: DeliveryMode,
        channel: String,
        payload: String,
        metrics: Arc<ProducerMetrics>,
        policy: ErrorPolicy,
        escalations: mpsc::UnboundedSender<DeliveryFailure>,
    ) -> Self {
        Self {
            mode,
            channel,
            payload,
            metrics,
            policy,
            escalations,
        }
    }

    /// Record the backend's reply. Consumes the handler, so a send can only
    /// ever be accounted once.
    pub fn complete(self, outcome: ProducerResult<()>) {
        match outcome {
            Ok(()) => self.metrics.record_success(),
            Err(e) => {
                self.metrics.record_failure();

                error!(
                    mode = %self.mode,
                    channel = %self.channel,
                    message = %self.payload,
                    error = %e,
                    "Error executing {} operation",
                    self.mode
                );

                if self.policy.is_fatal() {
                    let failure = DeliveryFailure {
                        mode: self.mode,
                        channel: self.channel,
                        error: e.to_string(),
                    };
                    // Receiver is gone only once the producer itself is dropped.
                    let _ = self.escalations.send(failure);
                }
            }
        }
    }
}
