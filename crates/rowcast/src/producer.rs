//! The producer: per-event orchestration and checkpoint gating.

use crate::channel::ChannelResolver;
use crate::completion::{DeliveryFailure, MetricsSnapshot, ProducerMetrics};
use crate::config::ProducerConfig;
use crate::delivery::{DeliveryDispatcher, RedisBackend, RedisClientBackend};
use crate::error::{ProducerError, ProducerResult};
use crate::event::ChangeEvent;
use crate::filter::OutputFilter;
use crate::position::PositionStore;
use crate::retry::{ErrorPolicy, RetryController};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle of an event sink, as seen by the pipeline driving it.
#[async_trait]
pub trait Producer: Send {
    /// Handle one event. `Err` means the pipeline must stop.
    async fn push(&mut self, event: ChangeEvent) -> ProducerResult<()>;

    /// Release backend resources without waiting for in-flight sends.
    async fn request_stop(&mut self);

    /// Wait for the stop to finish.
    async fn await_stop(&mut self, timeout: Duration);
}

/// Forwards change events to Redis and advances the checkpoint on commit.
///
/// Drive it from a single task: events are handled strictly in order, and
/// each `push` returns once the event's write has been issued.
pub struct RedisProducer {
    resolver: ChannelResolver,
    retry: RetryController,
    backend: Arc<dyn RedisBackend>,
    positions: Arc<dyn PositionStore>,
    filter: Arc<dyn OutputFilter>,
    metrics: Arc<ProducerMetrics>,
    escalations: mpsc::UnboundedReceiver<DeliveryFailure>,
    stopped: bool,
    /// First fatal error; once set every push fails.
    halted: Option<String>,
}

impl RedisProducer {
    /// Create a producer over the redis-rs backend described by `config`.
    ///
    /// No connection is made until the first send.
    pub fn connect(
        config: &ProducerConfig,
        positions: Arc<dyn PositionStore>,
        filter: Arc<dyn OutputFilter>,
    ) -> ProducerResult<Self> {
        let backend = RedisClientBackend::open(config.connection_info())?;
        Ok(Self::with_backend(config, Arc::new(backend), positions, filter))
    }

    /// Create a producer over any backend.
    pub fn with_backend(
        config: &ProducerConfig,
        backend: Arc<dyn RedisBackend>,
        positions: Arc<dyn PositionStore>,
        filter: Arc<dyn OutputFilter>,
    ) -> Self {
        let policy = ErrorPolicy::new(config.ignore_producer_error);
        let metrics = Arc::new(ProducerMetrics::new());
        let (escalation_tx, escalation_rx) = mpsc::unbounded_channel();

        let dispatcher = DeliveryDispatcher::new(
            config.delivery_mode,
            config.stream_field_key.clone(),
            backend.clone(),
            metrics.clone(),
            policy,
            escalation_tx,
        );

        info!(
            channel = %config.channel,
            mode = %config.delivery_mode,
            ignore_producer_error = config.ignore_producer_error,
            "Redis producer configured"
        );

        Self {
            resolver: ChannelResolver::new(config.channel.clone()),
            retry: RetryController::new(dispatcher, policy),
            backend,
            positions,
            filter,
            metrics,
            escalations: escalation_rx,
            stopped: false,
            halted: None,
        }
    }

    pub fn metrics(&self) -> Arc<ProducerMetrics> {
        self.metrics.clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Take the oldest escalated asynchronous failure, if any.
    pub fn take_escalation(&mut self) -> Option<DeliveryFailure> {
        self.escalations.try_recv().ok()
    }

    /// Wait up to `timeout` for every issued send to complete.
    ///
    /// Returns `false` if sends were still in flight when the timeout hit.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let in_flight = self.metrics.in_flight().get();
        if in_flight > 0 {
            debug!(in_flight, "Draining in-flight sends");
        }

        let drained = self.metrics.in_flight().wait_idle(timeout).await;
        if !drained {
            warn!(
                in_flight = self.metrics.in_flight().get(),
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for in-flight sends"
            );
        }
        drained
    }

    /// Whether a fatal error has ended this producer.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    async fn handle(&mut self, event: ChangeEvent) -> ProducerResult<()> {
        if let Some(failure) = self.take_escalation() {
            return Err(failure.into());
        }

        if !self.filter.should_output(&event) {
            self.positions.set_position(&event.next_position)?;
            return Ok(());
        }

        let destination = self.resolver.resolve(&event.identity);
        self.retry.attempt_send(&destination, &event).await?;

        if event.tx_commit {
            self.positions.set_position(&event.next_position)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Producer for RedisProducer {
    async fn push(&mut self, event: ChangeEvent) -> ProducerResult<()> {
        if self.stopped {
            return Err(ProducerError::Stopped);
        }
        if let Some(reason) = &self.halted {
            return Err(ProducerError::Halted(reason.clone()));
        }

        let result = self.handle(event).await;
        if let Err(e) = &result {
            error!(error = %e, "Fatal producer error, refusing further events");
            self.halted = Some(e.to_string());
        }
        result
    }

    async fn request_stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.backend.shutdown().await;
        info!(
            in_flight = self.metrics.in_flight().get(),
            "Redis producer stopped"
        );
    }

    /// Does nothing: in-flight sends are not awaited here. Call
    /// [`RedisProducer::drain`] before stopping to wait for them.
    async fn await_stop(&mut self, _timeout: Duration) {}
}
