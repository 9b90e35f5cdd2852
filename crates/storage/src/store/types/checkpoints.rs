#![forbid(unsafe_code)]

use cm_core::checkpoint::{Directives, RecoveryMeta};

#[derive(Clone, Debug)]
pub struct CheckpointRequest {
    pub epic_id: String,
    pub cell_id: String,
    pub agent: Option<String>,
    pub progress_percent: u8,
    pub files_modified: Vec<String>,
    pub directives: Directives,
    pub error_context: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwarmContextRow {
    pub epic_id: String,
    pub cell_id: String,
    pub agent: Option<String>,
    pub files_modified: Vec<String>,
    pub progress_percent: u8,
    pub directives: Directives,
    pub recovery: RecoveryMeta,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recovery {
    NotFound,
    Found {
        context: SwarmContextRow,
        age_seconds: i64,
    },
}

impl Recovery {
    pub fn found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}
