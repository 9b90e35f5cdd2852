#![forbid(unsafe_code)]

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod telemetry;
pub mod verification;

pub use collaborators::{
    CollaboratorError, JsonlMemory, MemoryEntry, MemoryStore, Messenger, NoopMemory,
    SearchPath, SqliteMessenger, ToolLocator,
};
pub use config::{ConfigError, LogConfig, SwarmConfig, VerificationConfig};
pub use coordinator::{
    CompletionRequest, CompletionResponse, Coordinator, GateFailure, GateState, PostCondition,
    PostConditionStatus, ProgressOutcome, ProgressReport, ReviewOutcome, StartTaskRequest,
    StartedTask,
};
pub use error::GateError;
pub use telemetry::init_tracing;
pub use verification::{
    Blocker, CommandVerifier, ErrorLocation, StepReport, StepStatus, VerificationReport, Verifier,
};
