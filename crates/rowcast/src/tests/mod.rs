//! Scenario tests for the Rowcast producer.
//!
//! - `harness.rs`       - MockRedis backend and builders
//! - `dispatch.rs`      - Delivery modes and channel templates
//! - `retry.rs`         - Issuance retry bound and classification
//! - `checkpoint.rs`    - Commit-gated position advancement
//! - `filtering.rs`     - Filtered events skip delivery but advance
//! - `escalation.rs`    - Fatal vs ignored asynchronous failures
//! - `accounting.rs`    - Success/failure counters and in-flight drain
//! - `shutdown.rs`      - Stop semantics

pub(crate) mod harness;
