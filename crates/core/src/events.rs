#![forbid(unsafe_code)]

//! Domain events. The event log stores one of these per row; projections are a fold over them.

use crate::model::{CellStatus, CellType, DependencyKind};
use serde::{Deserialize, Serialize};

pub const EVENT_TYPES: &[&str] = &[
    "cell_created",
    "cell_updated",
    "cell_status_changed",
    "cell_closed",
    "cell_dependency_added",
    "cell_dependency_removed",
    "cell_label_added",
    "cell_label_removed",
    "cell_comment_added",
    "swarm_checkpointed",
    "swarm_recovered",
    "subtask_outcome",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellEvent {
    CellCreated {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        cell_type: CellType,
        priority: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        /// Carried by imports so the original creation time survives a round trip.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at_ms: Option<i64>,
    },
    CellUpdated {
        changes: Vec<FieldChange>,
    },
    CellStatusChanged {
        from: CellStatus,
        to: CellStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CellClosed {
        reason: String,
    },
    CellDependencyAdded {
        depends_on: String,
        relationship: DependencyKind,
    },
    CellDependencyRemoved {
        depends_on: String,
        relationship: DependencyKind,
    },
    CellLabelAdded {
        label: String,
    },
    CellLabelRemoved {
        label: String,
    },
    CellCommentAdded {
        author: String,
        body: String,
    },
    SwarmCheckpointed {
        epic_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        progress_percent: u8,
        files_modified: Vec<String>,
    },
    SwarmRecovered {
        epic_id: String,
        age_seconds: i64,
    },
    SubtaskOutcome(SubtaskOutcome),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldChange {
    Title {
        old: String,
        new: String,
    },
    Description {
        old: Option<String>,
        new: Option<String>,
    },
    Priority {
        old: i64,
        new: i64,
    },
    CellType {
        old: CellType,
        new: CellType,
    },
    Assignee {
        old: Option<String>,
        new: Option<String>,
    },
    ParentId {
        old: Option<String>,
        new: Option<String>,
    },
}

impl FieldChange {
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Title { .. } => "title",
            Self::Description { .. } => "description",
            Self::Priority { .. } => "priority",
            Self::CellType { .. } => "cell_type",
            Self::Assignee { .. } => "assignee",
            Self::ParentId { .. } => "parent_id",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub agent: String,
    pub success: bool,
    pub duration_ms: i64,
    pub files_touched: Vec<String>,
    pub contract_violations: Vec<String>,
    pub strike_count: u32,
    pub error_count: u32,
}

impl CellEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CellCreated { .. } => "cell_created",
            Self::CellUpdated { .. } => "cell_updated",
            Self::CellStatusChanged { .. } => "cell_status_changed",
            Self::CellClosed { .. } => "cell_closed",
            Self::CellDependencyAdded { .. } => "cell_dependency_added",
            Self::CellDependencyRemoved { .. } => "cell_dependency_removed",
            Self::CellLabelAdded { .. } => "cell_label_added",
            Self::CellLabelRemoved { .. } => "cell_label_removed",
            Self::CellCommentAdded { .. } => "cell_comment_added",
            Self::SwarmCheckpointed { .. } => "swarm_checkpointed",
            Self::SwarmRecovered { .. } => "swarm_recovered",
            Self::SubtaskOutcome(_) => "subtask_outcome",
        }
    }

    /// Audit events never touch projections and are accepted for terminal cells.
    pub fn is_audit(&self) -> bool {
        matches!(
            self,
            Self::SwarmCheckpointed { .. } | Self::SwarmRecovered { .. } | Self::SubtaskOutcome(_)
        )
    }

    pub fn to_payload_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
