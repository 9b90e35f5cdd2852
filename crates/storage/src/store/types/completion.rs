#![forbid(unsafe_code)]

use super::{CloseResult, SignalResolution, StoredEvent};
use cm_core::events::SubtaskOutcome;

#[derive(Clone, Debug)]
pub struct CloseTaskRequest {
    pub cell_id: String,
    pub agent: String,
    pub reason: String,
    pub signal_payload: Option<serde_json::Value>,
    /// `agent` is overwritten with the normalized request agent.
    pub outcome: SubtaskOutcome,
}

#[derive(Clone, Debug)]
pub struct ClosedTask {
    pub close: CloseResult,
    pub released: usize,
    /// `None` when the cell was already closed and nothing else was touched.
    pub signal: Option<SignalResolution>,
    pub outcome: Option<StoredEvent>,
}
