//! Row-change events as they arrive from the upstream capture pipeline.

use crate::error::ProducerResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database and table a row change belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIdentity {
    pub database: String,
    pub table: String,
}

impl RowIdentity {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Checkpoint token: how far through the source log the pipeline has got.
///
/// Rowcast never interprets it beyond ordering for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Source log file name (e.g., "mysql-bin.000042").
    pub file: String,
    /// Byte offset of the next event inside `file`.
    pub offset: u64,
}

impl Position {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    /// Schema change
    Ddl,
    /// Liveness marker written by the capture pipeline, never delivered
    Heartbeat,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::Ddl => "ddl",
            EventKind::Heartbeat => "heartbeat",
        };
        f.write_str(name)
    }
}

/// One logical row mutation, ready for delivery.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub identity: RowIdentity,
    pub kind: EventKind,
    /// Serialized payload, delivered verbatim.
    pub payload: String,
    /// Last event of its source transaction.
    pub tx_commit: bool,
    /// Position to checkpoint once this event is handled.
    pub next_position: Position,
    /// Marked by the capture pipeline as not for output.
    pub suppressed: bool,
}

impl ChangeEvent {
    /// Short human-readable description used in debug logs.
    pub fn summary(&self) -> String {
        format!(
            "{} {} @ {}{}",
            self.kind,
            self.identity,
            self.next_position,
            if self.tx_commit { " (commit)" } else { "" }
        )
    }

    /// Parse one newline-delimited JSON record.
    ///
    /// The payload is the record itself, re-encoded compactly.
    pub fn from_json_line(line: &str) -> ProducerResult<Self> {
        let record: EventRecord = serde_json::from_str(line)?;
        record.into_event()
    }
}

/// Wire shape of an input record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub database: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xid: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub commit: bool,
    pub position: Position,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suppressed: bool,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn into_event(self) -> ProducerResult<ChangeEvent> {
        let payload = serde_json::to_string(&self)?;
        Ok(ChangeEvent {
            identity: RowIdentity::new(self.database, self.table),
            kind: self.kind,
            payload,
            tx_commit: self.commit,
            next_position: self.position,
            suppressed: self.suppressed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_line() {
        let line = r#"{"database":"shop","table":"orders","type":"insert","xid":7,"commit":true,"position":{"file":"bin.000001","offset":120},"data":{"id":1}}"#;
        let event = ChangeEvent::from_json_line(line).unwrap();

        assert_eq!(event.identity, RowIdentity::new("shop", "orders"));
        assert_eq!(event.kind, EventKind::Insert);
        assert!(event.tx_commit);
        assert!(!event.suppressed);
        assert_eq!(event.next_position, Position::new("bin.000001", 120));

        let payload: serde_json::Value = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(payload["data"]["id"], 1);
        assert_eq!(payload["type"], "insert");
    }

    #[test]
    fn test_commit_defaults_to_false() {
        let line = r#"{"database":"a","table":"b","type":"update","position":{"file":"f","offset":1}}"#;
        let event = ChangeEvent::from_json_line(line).unwrap();
        assert!(!event.tx_commit);
        assert!(!event.payload.contains("commit"));
    }

    #[test]
    fn test_malformed_line_is_json_error() {
        let err = ChangeEvent::from_json_line("{not json").unwrap_err();
        assert!(matches!(err, crate::error::ProducerError::Json(_)));
    }

    #[test]
    fn test_position_ordering() {
        assert!(Position::new("bin.000001", 900) < Position::new("bin.000002", 4));
        assert!(Position::new("bin.000002", 4) < Position::new("bin.000002", 10));
        assert_eq!(Position::new("bin.000003", 77).to_string(), "bin.000003:77");
    }

    #[test]
    fn test_summary() {
        let event = ChangeEvent {
            identity: RowIdentity::new("shop", "orders"),
            kind: EventKind::Delete,
            payload: "{}".into(),
            tx_commit: true,
            next_position: Position::new("bin.1", 5),
            suppressed: false,
        };
        assert_eq!(event.summary(), "delete shop.orders @ bin.1:5 (commit)");
    }
}
