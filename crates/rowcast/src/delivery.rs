//! Delivery of serialized payloads to Redis.
//!
//! The dispatcher turns a payload into one of four Redis writes and issues it
//! without waiting for the reply. The reply is observed by a spawned task that
//! hands it to a [`CompletionHandler`].

use crate::completion::{CompletionHandler, DeliveryFailure, ProducerMetrics};
use crate::error::{ProducerError, ProducerResult};
use crate::event::ChangeEvent;
use crate::retry::ErrorPolicy;
use async_trait::async_trait;
use futures_util::future::{self, BoxFuture};
use redis::aio::MultiplexedConnection;
use redis::{Client, ConnectionInfo};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn, Level};

/// Which Redis write delivers a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// LPUSH onto a list
    QueueLeft,
    /// RPUSH onto a list
    QueueRight,
    /// XADD to a stream, payload stored under the configured field
    StreamAppend,
    /// PUBLISH to a channel
    #[default]
    PubSub,
}

impl DeliveryMode {
    /// Parse a configured mode name. Anything unrecognised is pub/sub.
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "lpush" => DeliveryMode::QueueLeft,
            "rpush" => DeliveryMode::QueueRight,
            "xadd" => DeliveryMode::StreamAppend,
            "pubsub" => DeliveryMode::PubSub,
            other => {
                warn!(mode = %other, "Unrecognized delivery mode, using pubsub");
                DeliveryMode::PubSub
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::QueueLeft => "lpush",
            DeliveryMode::QueueRight => "rpush",
            DeliveryMode::StreamAppend => "xadd",
            DeliveryMode::PubSub => "pubsub",
        }
    }

    fn destination_kind(&self) -> &'static str {
        match self {
            DeliveryMode::QueueLeft => "queue (left)",
            DeliveryMode::QueueRight => "queue (right)",
            DeliveryMode::StreamAppend => "stream",
            DeliveryMode::PubSub => "channel",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved write, ready to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryCommand {
    QueueLeft { key: String, payload: String },
    QueueRight { key: String, payload: String },
    StreamAppend { key: String, field: String, payload: String },
    PubSub { channel: String, payload: String },
}

impl DeliveryCommand {
    /// Build the write for `mode`.
    ///
    /// Stream appends need a field name; its absence is a configuration error
    /// raised here, before anything touches the network.
    pub fn build(
        mode: DeliveryMode,
        destination: &str,
        payload: &str,
        stream_field_key: Option<&str>,
    ) -> ProducerResult<Self> {
        let key = destination.to_string();
        let payload = payload.to_string();

        let command = match mode {
            DeliveryMode::QueueLeft => DeliveryCommand::QueueLeft { key, payload },
            DeliveryMode::QueueRight => DeliveryCommand::QueueRight { key, payload },
            DeliveryMode::StreamAppend => {
                let field = stream_field_key.ok_or_else(|| {
                    ProducerError::Config(
                        "Stream requires key name for serialized JSON value".to_string(),
                    )
                })?;
                DeliveryCommand::StreamAppend {
                    key,
                    field: field.to_string(),
                    payload,
                }
            }
            DeliveryMode::PubSub => DeliveryCommand::PubSub {
                channel: key,
                payload,
            },
        };

        Ok(command)
    }

    pub fn mode(&self) -> DeliveryMode {
        match self {
            DeliveryCommand::QueueLeft { .. } => DeliveryMode::QueueLeft,
            DeliveryCommand::QueueRight { .. } => DeliveryMode::QueueRight,
            DeliveryCommand::StreamAppend { .. } => DeliveryMode::StreamAppend,
            DeliveryCommand::PubSub { .. } => DeliveryMode::PubSub,
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            DeliveryCommand::QueueLeft { key, .. }
            | DeliveryCommand::QueueRight { key, .. }
            | DeliveryCommand::StreamAppend { key, .. } => key,
            DeliveryCommand::PubSub { channel, .. } => channel,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            DeliveryCommand::QueueLeft { payload, .. }
            | DeliveryCommand::QueueRight { payload, .. }
            | DeliveryCommand::StreamAppend { payload, .. }
            | DeliveryCommand::PubSub { payload, .. } => payload,
        }
    }

    /// The Redis command for this write.
    pub fn to_redis_cmd(&self) -> redis::Cmd {
        match self {
            DeliveryCommand::QueueLeft { key, payload } => {
                let mut cmd = redis::cmd("LPUSH");
                cmd.arg(key).arg(payload);
                cmd
            }
            DeliveryCommand::QueueRight { key, payload } => {
                let mut cmd = redis::cmd("RPUSH");
                cmd.arg(key).arg(payload);
                cmd
            }
            DeliveryCommand::StreamAppend {
                key,
                field,
                payload,
            } => {
                // XADD key * field value
                let mut cmd = redis::cmd("XADD");
                cmd.arg(key).arg("*").arg(field).arg(payload);
                cmd
            }
            DeliveryCommand::PubSub { channel, payload } => {
                let mut cmd = redis::cmd("PUBLISH");
                cmd.arg(channel).arg(payload);
                cmd
            }
        }
    }
}

/// Reply to an issued write, resolved once the backend answers.
pub type PendingReply = BoxFuture<'static, ProducerResult<()>>;

/// Seam between the dispatcher and the Redis client.
///
/// `issue` returns as soon as the write is ready to go; the write must hit the
/// wire no later than the first poll of the returned reply, which the
/// dispatcher does before `send` returns. Errors it returns are
/// synchronous issuance failures (no connection, client closed); errors the
/// returned [`PendingReply`] resolves to are asynchronous delivery failures.
#[async_trait]
pub trait RedisBackend: Send + Sync {
    async fn issue(&self, command: DeliveryCommand) -> ProducerResult<PendingReply>;

    /// Release connections. Replies still pending may or may not resolve.
    async fn shutdown(&self);
}

/// The backend's current connection, tagged with the generation that opened it.
///
/// A failed reply only discards the connection it was sent on; a newer one
/// installed in the meantime survives.
#[derive(Debug)]
pub struct ConnectionSlot<C> {
    generation: u64,
    conn: Option<C>,
}

impl<C: Clone> ConnectionSlot<C> {
    pub fn new() -> Self {
        Self {
            generation: 0,
            conn: None,
        }
    }

    /// The live connection and its generation, if any.
    pub fn current(&self) -> Option<(u64, C)> {
        self.conn.as_ref().map(|c| (self.generation, c.clone()))
    }

    /// Install a fresh connection and return its generation.
    pub fn install(&mut self, conn: C) -> u64 {
        self.generation += 1;
        self.conn = Some(conn);
        self.generation
    }

    /// Drop the connection if it is still the one from `generation`.
    pub fn discard(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.conn.is_some() {
            self.conn = None;
            return true;
        }
        false
    }

    /// Drop whatever connection is installed.
    pub fn take(&mut self) -> Option<C> {
        self.conn.take()
    }
}

impl<C: Clone> Default for ConnectionSlot<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// [`RedisBackend`] over a single multiplexed redis-rs connection.
///
/// The connection is opened lazily on first use and discarded when a reply
/// reports it dropped, so the next issuance reconnects.
pub struct RedisClientBackend {
    client: Client,
    conn: Arc<Mutex<ConnectionSlot<MultiplexedConnection>>>,
    closed: AtomicBool,
}

impl RedisClientBackend {
    pub fn open(info: ConnectionInfo) -> ProducerResult<Self> {
        let client = Client::open(info)?;
        Ok(Self {
            client,
            conn: Arc::new(Mutex::new(ConnectionSlot::new())),
            closed: AtomicBool::new(false),
        })
    }

    /// Open the connection now instead of on the first send.
    pub async fn connect(&self) -> ProducerResult<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> ProducerResult<(u64, MultiplexedConnection)> {
        let mut slot = self.conn.lock().await;
        if let Some(current) = slot.current() {
            return Ok(current);
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        let generation = slot.install(conn.clone());
        info!(
            addr = %self.client.get_connection_info().addr,
            generation,
            "Connected to Redis"
        );
        Ok((generation, conn))
    }
}

#[async_trait]
impl RedisBackend for RedisClientBackend {
    async fn issue(&self, command: DeliveryCommand) -> ProducerResult<PendingReply> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProducerError::Stopped);
        }

        let (generation, mut conn) = self.connection().await?;
        let cmd = command.to_redis_cmd();
        let slot = self.conn.clone();

        Ok(Box::pin(async move {
            let reply: redis::RedisResult<redis::Value> = cmd.query_async(&mut conn).await;
            match reply {
                Ok(_) => Ok(()),
                Err(e) => {
                    if (e.is_connection_dropped() || e.is_io_error())
                        && slot.lock().await.discard(generation)
                    {
                        warn!(generation, "Redis connection dropped, will reconnect");
                    }
                    Err(e.into())
                }
            }
        }))
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.conn.lock().await.take().is_some() {
            info!("Redis connection released");
        }
    }
}

/// Poll a reply once so its request is written before the caller moves on.
///
/// redis-rs only queues a command on the connection when its future is first
/// polled. Polling here, on the producer task, keeps wire order equal to
/// issue order; the completion task then only waits for the answer.
pub async fn start(mut pending: PendingReply) -> PendingReply {
    match futures_util::poll!(pending.as_mut()) {
        Poll::Ready(outcome) => Box::pin(future::ready(outcome)),
        Poll::Pending => pending,
    }
}

/// Issues writes and attaches a completion handler to each.
pub struct DeliveryDispatcher {
    mode: DeliveryMode,
    stream_field_key: Option<String>,
    backend: Arc<dyn RedisBackend>,
    metrics: Arc<ProducerMetrics>,
    policy: ErrorPolicy,
    escalations: mpsc::UnboundedSender<DeliveryFailure>,
}

impl DeliveryDispatcher {
    pub fn new(
        mode: DeliveryMode,
        stream_field_key: Option<String>,
        backend: Arc<dyn RedisBackend>,
        metrics: Arc<ProducerMetrics>,
        policy: ErrorPolicy,
        escalations: mpsc::UnboundedSender<DeliveryFailure>,
    ) -> Self {
        Self {
            mode,
            stream_field_key,
            backend,
            metrics,
            policy,
            escalations,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Issue one event's payload to `destination`.
    ///
    /// Returns once the write is issued; the reply is accounted for later by
    /// the completion handler. Must be called from within a Tokio runtime.
    pub async fn send(&self, destination: &str, event: &ChangeEvent) -> ProducerResult<()> {
        let command = DeliveryCommand::build(
            self.mode,
            destination,
            &event.payload,
            self.stream_field_key.as_deref(),
        )?;

        let pending = start(self.backend.issue(command).await?).await;

        let handler = CompletionHandler::new(
            self.mode,
            destination.to_string(),
            event.payload.clone(),
            self.metrics.clone(),
            self.policy,
            self.escalations.clone(),
        );
        let metrics = self.metrics.clone();
        metrics.in_flight().begin();

        tokio::spawn(async move {
            let outcome = pending.await;
            handler.complete(outcome);
            metrics.in_flight().finish();
        });

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                "->  {}:{}, msg:{}",
                self.mode.destination_kind(),
                destination,
                event.summary()
            );
        }

        Ok(())
    }
}
