#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const MILESTONES: [u8; 3] = [25, 50, 75];

/// Coordinator-provided context handed to a worker; persisted as JSON in the snapshot row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directives {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills_to_load: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_notes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryMeta {
    pub last_checkpoint_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u8>,
}

/// Highest milestone in `(previous, current]`, if any.
pub fn crossed_milestone(previous: Option<u8>, current: u8) -> Option<u8> {
    let previous = previous.unwrap_or(0);
    MILESTONES
        .iter()
        .rev()
        .copied()
        .find(|milestone| previous < *milestone && current >= *milestone)
}

pub fn validate_progress(progress_percent: u8) -> Result<u8, &'static str> {
    if progress_percent > 100 {
        return Err("progress_percent must be within 0..=100");
    }
    Ok(progress_percent)
}
