#![forbid(unsafe_code)]

use cm_core::events::CellEvent;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    pub seq: i64,
    pub ts_ms: i64,
    pub project: String,
    pub cell_id: String,
    pub event: CellEvent,
}

impl StoredEvent {
    pub fn event_id(&self) -> String {
        format!("evt_{:016}", self.seq)
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Result of an append. `deduped` marks a repeated close that was absorbed; `event` is then
/// the original closing event.
#[derive(Clone, Debug)]
pub struct Appended {
    pub event: StoredEvent,
    pub deduped: bool,
}

#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub cell_id: Option<String>,
    pub event_types: Vec<String>,
    /// Exclusive lower bound; resume a read by passing the last seen `seq`.
    pub after_seq: Option<i64>,
    pub limit: Option<usize>,
}
