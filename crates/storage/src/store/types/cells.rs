#![forbid(unsafe_code)]

use super::events::StoredEvent;
use cm_core::model::{CellStatus, CellType, DependencyKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub cell_type: CellType,
    pub status: CellStatus,
    pub priority: i64,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub closed_at_ms: Option<i64>,
    pub closed_reason: Option<String>,
    pub last_seq: i64,
}

#[derive(Clone, Debug)]
pub struct CreateCellRequest {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub cell_type: CellType,
    pub priority: i64,
    pub parent_id: Option<String>,
}

impl CreateCellRequest {
    pub fn task(title: impl Into<String>, priority: i64) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            cell_type: CellType::Task,
            priority,
            parent_id: None,
        }
    }
}

/// Field-level edits. `Some(None)` clears an optional field.
#[derive(Clone, Debug, Default)]
pub struct CellPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<i64>,
    pub cell_type: Option<CellType>,
    pub assignee: Option<Option<String>>,
    pub parent_id: Option<Option<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct CellQuery {
    pub status: Option<CellStatus>,
    pub cell_type: Option<CellType>,
    pub parent_id: Option<String>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct CloseResult {
    pub cell: CellRow,
    pub event: StoredEvent,
    pub already_closed: bool,
}

/// Snapshot of one dirty mark; see `SqliteStore::clear_dirty_marks`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirtyMark {
    pub cell_id: String,
    pub mark_seq: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyRow {
    pub from_id: String,
    pub to_id: String,
    pub relationship: DependencyKind,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentRow {
    pub seq: i64,
    pub author: String,
    pub body: String,
    pub ts_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockedCell {
    pub cell: CellRow,
    pub blockers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpicProgress {
    pub epic_id: String,
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub closed: usize,
    pub tombstone: usize,
}

impl EpicProgress {
    pub fn percent_closed(&self) -> u8 {
        let live = self.total - self.tombstone;
        if live == 0 {
            return 0;
        }
        ((self.closed * 100) / live).min(100) as u8
    }
}
