//! Bounded retry around issuing a send, and the fatal-vs-ignored error policy.

use crate::delivery::DeliveryDispatcher;
use crate::error::{ProducerError, ProducerResult};
use crate::event::ChangeEvent;
use tracing::{error, warn};

/// Total issuance attempts per event, first try included.
pub const MAX_SEND_ATTEMPTS: u32 = 2;

/// Whether delivery failures stop the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    ignore_producer_error: bool,
}

impl ErrorPolicy {
    pub fn new(ignore_producer_error: bool) -> Self {
        Self {
            ignore_producer_error,
        }
    }

    /// Failures must be escalated rather than swallowed.
    pub fn is_fatal(&self) -> bool {
        !self.ignore_producer_error
    }

    /// Apply the policy to an already logged failure.
    pub fn escalate(&self, err: ProducerError) -> ProducerResult<()> {
        if self.is_fatal() {
            Err(err)
        } else {
            Ok(())
        }
    }
}

/// Retries transient issuance failures once.
///
/// Only the synchronous part of a send is retried. A write that was issued
/// and later failed is the completion handler's business.
pub struct RetryController {
    dispatcher: DeliveryDispatcher,
    policy: ErrorPolicy,
}

impl RetryController {
    pub fn new(dispatcher: DeliveryDispatcher, policy: ErrorPolicy) -> Self {
        Self { dispatcher, policy }
    }

    pub fn dispatcher(&self) -> &DeliveryDispatcher {
        &self.dispatcher
    }

    /// Try to issue `event` to `destination`, at most [`MAX_SEND_ATTEMPTS`] times.
    ///
    /// Returns `Err` only when a non-transient failure must be escalated.
    /// Running out of attempts on transient errors is logged and swallowed.
    pub async fn attempt_send(&self, destination: &str, event: &ChangeEvent) -> ProducerResult<()> {
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            match self.dispatcher.send(destination, event).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    if attempt < MAX_SEND_ATTEMPTS {
                        warn!(
                            attempt,
                            channel = %destination,
                            error = %e,
                            "Error with redis communication, will try again"
                        );
                    } else {
                        error!(
                            attempts = attempt,
                            channel = %destination,
                            event = %event.summary(),
                            error = %e,
                            "Error with redis communication, giving up on event"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        channel = %destination,
                        event = %event.summary(),
                        error = %e,
                        "Exception during put"
                    );
                    return self.policy.escalate(e);
                }
            }
        }

        Ok(())
    }
}
