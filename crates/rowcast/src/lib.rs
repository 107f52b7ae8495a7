//! Rowcast: forwards row-change events to Redis.
//!
//! Each change event captured from a database's transaction log is written
//! to Redis as a list push, a stream entry or a pub/sub message. Writes are
//! issued without waiting for the reply; replies are accounted for by
//! completion handlers running alongside the producer.
//!
//! # Core Invariants
//!
//! 1. **Commit-Gated Checkpoints**: the position advances only on the last
//!    event of a transaction, after that event's write has been issued
//! 2. **Filtered Events Still Advance**: events rejected by the output
//!    filter are never sent, but their position is applied immediately
//! 3. **Two Attempts Max**: a transient issuance failure is retried once
//! 4. **One Outcome Per Send**: every issued write is counted exactly once,
//!    as a success or a failure
//!
//! # Architecture
//!
//! ```text
//! event -> filter -> channel template -> retry -> dispatcher -> Redis
//!             |                                      |
//!             v                                      v
//!         position <------ commit?            completion handler
//!                                              (metrics, escalation)
//! ```

pub mod channel;
pub mod completion;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod filter;
pub mod position;
pub mod producer;
pub mod retry;

#[cfg(test)]
mod tests;

pub use channel::ChannelResolver;
pub use completion::{CompletionHandler, DeliveryFailure, MetricsSnapshot, ProducerMetrics};
pub use config::ProducerConfig;
pub use delivery::{DeliveryCommand, DeliveryDispatcher, DeliveryMode, RedisBackend, RedisClientBackend};
pub use error::{ProducerError, ProducerResult};
pub use event::{ChangeEvent, EventKind, EventRecord, Position, RowIdentity};
pub use filter::{OutputConfig, OutputFilter};
pub use position::{FilePositionStore, MemoryPositionStore, PositionStore};
pub use producer::{Producer, RedisProducer};
pub use retry::{ErrorPolicy, RetryController, MAX_SEND_ATTEMPTS};
