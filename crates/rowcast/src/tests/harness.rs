//! Test harness for Rowcast scenario tests.
//!
//! Provides:
//! - MockRedis: a scripted [`RedisBackend`] that records every issued write
//!   and applies accepted ones to in-memory lists, streams and channels when
//!   the reply is first polled
//! - Event and config builders
//! - `producer()`: a RedisProducer wired to a MockRedis and a memory store

use crate::config::ProducerConfig;
use crate::delivery::{DeliveryCommand, DeliveryMode, PendingReply, RedisBackend};
use crate::error::{ProducerError, ProducerResult};
use crate::event::{ChangeEvent, EventKind, Position, RowIdentity};
use crate::filter::{OutputConfig, OutputFilter};
use crate::position::MemoryPositionStore;
use crate::producer::RedisProducer;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Generous bound for waiting on completions in tests.
pub const DRAIN: Duration = Duration::from_secs(2);

/// Synchronous failure raised by `issue` before a write goes out.
#[derive(Debug, Clone, Copy)]
pub enum IssueFailure {
    /// Connection refused; transient
    ConnectionRefused,
    /// Backend already shut down; not transient
    Closed,
}

impl IssueFailure {
    fn into_error(self) -> ProducerError {
        match self {
            IssueFailure::ConnectionRefused => ProducerError::Redis(redis::RedisError::from(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            )),
            IssueFailure::Closed => ProducerError::Stopped,
        }
    }
}

/// How the backend answers an issued write.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Accept and apply the write
    Ok,
    /// Reject with a server error
    Fail(&'static str),
    /// Apply at once, answer after a delay
    DelayThenOk(Duration),
}

/// In-memory Redis data touched by successful writes.
#[derive(Debug, Default)]
struct Store {
    lists: HashMap<String, VecDeque<String>>,
    streams: HashMap<String, Vec<(String, String)>>,
    published: Vec<(String, String)>,
}

impl Store {
    fn apply(&mut self, command: &DeliveryCommand) {
        match command {
            DeliveryCommand::QueueLeft { key, payload } => {
                self.lists
                    .entry(key.clone())
                    .or_default()
                    .push_front(payload.clone());
            }
            DeliveryCommand::QueueRight { key, payload } => {
                self.lists
                    .entry(key.clone())
                    .or_default()
                    .push_back(payload.clone());
            }
            DeliveryCommand::StreamAppend {
                key,
                field,
                payload,
            } => {
                self.streams
                    .entry(key.clone())
                    .or_default()
                    .push((field.clone(), payload.clone()));
            }
            DeliveryCommand::PubSub { channel, payload } => {
                self.published.push((channel.clone(), payload.clone()));
            }
        }
    }
}

/// Scripted Redis backend.
pub struct MockRedis {
    store: Arc<Mutex<Store>>,
    issued: Mutex<Vec<DeliveryCommand>>,
    issue_attempts: AtomicUsize,
    issue_failures: Mutex<VecDeque<IssueFailure>>,
    replies: Mutex<VecDeque<Reply>>,
    default_reply: Mutex<Reply>,
    shut_down: AtomicBool,
}

impl MockRedis {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            issued: Mutex::new(Vec::new()),
            issue_attempts: AtomicUsize::new(0),
            issue_failures: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(Reply::Ok),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Fail the next issuance attempt.
    pub fn fail_next_issue(&self, failure: IssueFailure) {
        self.issue_failures.lock().unwrap().push_back(failure);
    }

    /// Answer the next issued write with `reply`.
    pub fn queue_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Answer writes with `reply` once the queue is empty.
    pub fn set_default_reply(&self, reply: Reply) {
        *self.default_reply.lock().unwrap() = reply;
    }

    /// Calls to `issue`, failed ones included.
    pub fn issue_attempts(&self) -> usize {
        self.issue_attempts.load(AtomicOrdering::SeqCst)
    }

    /// Writes that were actually issued, in order.
    pub fn issued(&self) -> Vec<DeliveryCommand> {
        self.issued.lock().unwrap().clone()
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.store
            .lock()
            .unwrap()
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stream(&self, key: &str) -> Vec<(String, String)> {
        self.store
            .lock()
            .unwrap()
            .streams
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.store.lock().unwrap().published.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl RedisBackend for MockRedis {
    async fn issue(&self, command: DeliveryCommand) -> ProducerResult<PendingReply> {
        self.issue_attempts.fetch_add(1, AtomicOrdering::SeqCst);

        if self.is_shut_down() {
            return Err(ProducerError::Stopped);
        }
        if let Some(failure) = self.issue_failures.lock().unwrap().pop_front() {
            return Err(failure.into_error());
        }

        self.issued.lock().unwrap().push(command.clone());

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.lock().unwrap().clone());
        let store = self.store.clone();

        // Like a redis-rs reply, the write reaches the server on first poll.
        Ok(Box::pin(async move {
            match reply {
                Reply::Ok => {
                    store.lock().unwrap().apply(&command);
                    Ok(())
                }
                Reply::Fail(message) => Err(ProducerError::Redis(redis::RedisError::from((
                    redis::ErrorKind::ResponseError,
                    message,
                )))),
                Reply::DelayThenOk(delay) => {
                    store.lock().unwrap().apply(&command);
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
            }
        }))
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, AtomicOrdering::SeqCst);
    }
}

/// Build a row event at `offset` in a fixed binlog file.
pub fn event(database: &str, table: &str, offset: u64, tx_commit: bool) -> ChangeEvent {
    ChangeEvent {
        identity: RowIdentity::new(database, table),
        kind: EventKind::Insert,
        payload: format!(r#"{{"database":"{database}","table":"{table}","offset":{offset}}}"#),
        tx_commit,
        next_position: position(offset),
        suppressed: false,
    }
}

pub fn position(offset: u64) -> Position {
    Position::new("mysql-bin.000001", offset)
}

/// Config for `mode` with a constant channel.
pub fn config(mode: DeliveryMode, ignore_producer_error: bool) -> ProducerConfig {
    ProducerConfig {
        channel: "changes".to_string(),
        delivery_mode: mode,
        ignore_producer_error,
        ..Default::default()
    }
}

/// A producer over `redis` with the default output filter.
pub fn producer(
    config: &ProducerConfig,
    redis: &Arc<MockRedis>,
) -> (RedisProducer, Arc<MemoryPositionStore>) {
    producer_with_filter(config, redis, Arc::new(OutputConfig::default()))
}

pub fn producer_with_filter(
    config: &ProducerConfig,
    redis: &Arc<MockRedis>,
    filter: Arc<dyn OutputFilter>,
) -> (RedisProducer, Arc<MemoryPositionStore>) {
    let positions = Arc::new(MemoryPositionStore::new());
    let producer =
        RedisProducer::with_backend(config, redis.clone(), positions.clone(), filter);
    (producer, positions)
}
