#![forbid(unsafe_code)]

use super::types::ReservationConflict;
use cm_core::model::CellStatus;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Coarse classification callers branch on (retry, escalate, surface to a human).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    TransientInfra,
    FatalInvariant,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::TransientInfra => "transient_infra",
            Self::FatalInvariant => "fatal_invariant",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown cell: {cell_id}")]
    UnknownCell { cell_id: String },
    #[error("cell already exists: {cell_id}")]
    DuplicateCell { cell_id: String },
    #[error("cell is terminal (cell_id={cell_id}, status={status}, event={event_type})")]
    TerminalCell {
        cell_id: String,
        status: CellStatus,
        event_type: &'static str,
    },
    #[error("invalid status transition (cell_id={cell_id}, {from} -> {to})")]
    InvalidTransition {
        cell_id: String,
        from: CellStatus,
        to: CellStatus,
    },
    #[error("reservation conflict (agent={agent}, conflicts={})", .conflicts.len())]
    ReservationConflict {
        agent: String,
        conflicts: Vec<ReservationConflict>,
    },
    #[error("corrupt export at line {line}: {message}")]
    CorruptExport { line: usize, message: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::TransientInfra,
            Self::Sql(err) if is_busy(err) => ErrorKind::TransientInfra,
            Self::Sql(_) | Self::Json(_) => ErrorKind::Internal,
            Self::InvalidInput(_) | Self::CorruptExport { .. } => ErrorKind::Validation,
            Self::UnknownCell { .. } => ErrorKind::NotFound,
            Self::DuplicateCell { .. } | Self::ReservationConflict { .. } => ErrorKind::Conflict,
            Self::TerminalCell { .. } | Self::InvalidTransition { .. } => {
                ErrorKind::FatalInvariant
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(err) if is_busy(err) => "DB_BUSY",
            Self::Sql(_) => "SQLITE",
            Self::Json(_) => "JSON",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::UnknownCell { .. } => "UNKNOWN_CELL",
            Self::DuplicateCell { .. } => "DUPLICATE_CELL",
            Self::TerminalCell { .. } => "TERMINAL_CELL",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ReservationConflict { .. } => "RESERVATION_CONFLICT",
            Self::CorruptExport { .. } => "CORRUPT_EXPORT",
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
