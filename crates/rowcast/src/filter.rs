//! Decides which events are delivered at all.

use crate::event::{ChangeEvent, EventKind};

/// Output predicate evaluated before delivery.
///
/// Events it rejects are not sent, but their position is still applied.
pub trait OutputFilter: Send + Sync {
    fn should_output(&self, event: &ChangeEvent) -> bool;
}

impl<F> OutputFilter for F
where
    F: Fn(&ChangeEvent) -> bool + Send + Sync,
{
    fn should_output(&self, event: &ChangeEvent) -> bool {
        self(event)
    }
}

/// Default output rules.
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Deliver schema-change events.
    pub output_ddl: bool,
}

impl OutputFilter for OutputConfig {
    fn should_output(&self, event: &ChangeEvent) -> bool {
        if event.suppressed {
            return false;
        }
        match event.kind {
            EventKind::Heartbeat => false,
            EventKind::Ddl => self.output_ddl,
            EventKind::Insert | EventKind::Update | EventKind::Delete => true,
        }
    }
}
