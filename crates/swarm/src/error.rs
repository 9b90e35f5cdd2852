#![forbid(unsafe_code)]

use crate::collaborators::CollaboratorError;
use crate::config::ConfigError;
use cm_storage::{ErrorKind, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("collaborator: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("cell struck out (cell_id={cell_id}, strikes={count})")]
    StruckOut {
        cell_id: String,
        count: u32,
        prompt: Option<String>,
    },
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) => err.kind(),
            Self::Config(_) | Self::InvalidInput(_) => ErrorKind::Validation,
            Self::Collaborator(_) => ErrorKind::TransientInfra,
            Self::StruckOut { .. } => ErrorKind::Conflict,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Config(err) => err.code(),
            Self::Collaborator(_) => "COLLABORATOR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::StruckOut { .. } => "STRUCK_OUT",
        }
    }

    /// What the caller should do next; `None` when the message already says it.
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::TransientInfra => Some("retry after a short backoff"),
            ErrorKind::NotFound => Some("check the cell id against query_cells"),
            ErrorKind::Conflict => match self {
                Self::StruckOut { .. } => Some("a human must review the approach and clear strikes"),
                _ => Some("wait for the other agent or pick different files"),
            },
            ErrorKind::FatalInvariant => Some("the cell is in a state that does not allow this"),
            ErrorKind::Validation | ErrorKind::Internal => None,
        }
    }
}
