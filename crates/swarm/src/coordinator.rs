#![forbid(unsafe_code)]

//! The completion gate and the task lifecycle around it.
//!
//! A `Coordinator` owns one store connection plus the collaborators. It is built once per
//! agent process and passed by `&mut`; nothing here is global.

use crate::collaborators::{
    MemoryEntry, MemoryStore, Messenger, NoopMemory, SearchPath, SqliteMessenger,
};
use crate::config::SwarmConfig;
use crate::error::GateError;
use crate::verification::{Blocker, CommandVerifier, VerificationReport, Verifier};
use cm_core::checkpoint::{Directives, crossed_milestone, validate_progress};
use cm_core::contract::{ContractReport, validate_contract};
use cm_core::events::SubtaskOutcome;
use cm_core::ids::ProjectKey;
use cm_core::model::{CellStatus, Importance};
use cm_core::strikes::STRIKE_LIMIT;
use cm_storage::{
    CellPatch, CellRow, CheckpointRequest, CloseTaskRequest, ReservationRow, ReserveRequest,
    ReviewRequest, ReviewRow, ReviewVerdict, SendMessageRequest, SignalResolution, SqliteStore,
    StoreError, StrikeStatus, now_ms,
};
use serde::Serialize;

const DEFAULT_CLOSE_REASON: &str = "completed";
const FALLBACK_SENDER: &str = "cellmind";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Working,
    PendingReview,
    NeedsChanges,
    Verified,
    Closed,
    StruckOut,
    Failed,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "WORKING",
            Self::PendingReview => "PENDING_REVIEW",
            Self::NeedsChanges => "NEEDS_CHANGES",
            Self::Verified => "VERIFIED",
            Self::Closed => "CLOSED",
            Self::StruckOut => "STRUCK_OUT",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompletionRequest {
    pub cell_id: String,
    pub agent: String,
    pub epic_id: Option<String>,
    /// Becomes the close reason.
    pub summary: Option<String>,
    pub files_touched: Vec<String>,
    pub files_owned: Vec<String>,
    pub skip_review: bool,
    pub skip_verification: bool,
    /// Start of the work for the outcome's duration; the cell's creation time otherwise.
    pub started_at_ms: Option<i64>,
    pub error_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PostConditionStatus {
    Ok,
    Skipped(String),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostCondition {
    pub name: &'static str,
    pub status: PostConditionStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GateFailure {
    pub code: &'static str,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletionResponse {
    pub cell_id: String,
    pub state: GateState,
    /// States passed through on this call, ending with `state`.
    pub trail: Vec<GateState>,
    pub already_closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_review_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_feedback: Option<String>,
    pub blockers: Vec<Blocker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractReport>,
    pub strike_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture_prompt: Option<String>,
    pub post_conditions: Vec<PostCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GateFailure>,
}

impl CompletionResponse {
    fn new(cell_id: &str) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            state: GateState::Working,
            trail: vec![GateState::Working],
            already_closed: false,
            hint: None,
            remaining_review_attempts: None,
            review_feedback: None,
            blockers: Vec::new(),
            verification: None,
            contract: None,
            strike_count: 0,
            architecture_prompt: None,
            post_conditions: Vec::new(),
            error: None,
        }
    }

    fn enter(&mut self, state: GateState) {
        self.state = state;
        if self.trail.last() != Some(&state) {
            self.trail.push(state);
        }
    }

    fn failed(cell_id: &str, err: &GateError) -> Self {
        let mut response = Self::new(cell_id);
        response.enter(GateState::Failed);
        response.error = Some(GateFailure {
            code: err.code(),
            kind: err.kind().as_str(),
            message: err.to_string(),
            recovery: err.recovery_hint(),
        });
        response
    }

    pub fn post_condition(&self, name: &str) -> Option<&PostConditionStatus> {
        self.post_conditions
            .iter()
            .find(|condition| condition.name == name)
            .map(|condition| &condition.status)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StartTaskRequest {
    pub cell_id: String,
    pub agent: String,
    /// Reserved exclusively for the agent; empty reserves nothing.
    pub files: Vec<String>,
    pub reason: Option<String>,
    pub ttl_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct StartedTask {
    pub cell: CellRow,
    pub reservations: Vec<ReservationRow>,
    pub signal_registered: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ProgressReport {
    pub epic_id: String,
    pub cell_id: String,
    pub agent: Option<String>,
    pub progress_percent: u8,
    pub files_modified: Vec<String>,
    pub directives: Directives,
    /// Forwarded to the coordinator agent when present.
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressOutcome {
    pub progress_percent: u8,
    pub milestone: Option<u8>,
    pub checkpoint: PostConditionStatus,
}

#[derive(Clone, Debug)]
pub struct ReviewOutcome {
    pub review: ReviewRow,
    pub rejections: u32,
    pub remaining_attempts: u32,
    pub strikes: Option<StrikeStatus>,
    pub blocked: bool,
}

pub struct Coordinator {
    config: SwarmConfig,
    project: ProjectKey,
    store: SqliteStore,
    messenger: Box<dyn Messenger>,
    memory: Box<dyn MemoryStore>,
    verifier: Box<dyn Verifier>,
}

impl Coordinator {
    /// Opens the project store and wires the default collaborators: database messaging,
    /// no memory, command verification resolved against `PATH`.
    pub fn open(config: SwarmConfig) -> Result<Self, GateError> {
        let project = config.project_key()?;
        let mut store = SqliteStore::open(&config.storage_dir)?;
        store.project_init(&project)?;
        let messenger = SqliteMessenger::open(&config.storage_dir, project.clone())?;
        let verifier = CommandVerifier::new(config.verification.clone(), Box::new(SearchPath::from_env()));
        tracing::info!(project = %project, storage_dir = %config.storage_dir.display(), "coordinator ready");
        Ok(Self {
            config,
            project,
            store,
            messenger: Box::new(messenger),
            memory: Box::new(NoopMemory),
            verifier: Box::new(verifier),
        })
    }

    pub fn with_messenger(mut self, messenger: Box<dyn Messenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn with_memory(mut self, memory: Box<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn project(&self) -> &ProjectKey {
        &self.project
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    /// Claims a cell for an agent: reserves its files, assigns it, moves it to
    /// `in_progress` and registers the completion signal.
    ///
    /// A refused reservation leaves the cell untouched; a failed status change releases
    /// what was just reserved.
    pub fn start_task(&mut self, request: StartTaskRequest) -> Result<StartedTask, GateError> {
        let agent = request.agent.trim().to_string();
        if agent.is_empty() {
            return Err(GateError::InvalidInput("agent must not be empty"));
        }
        let cell = self.require_cell(request.cell_id.trim())?;
        if cell.status.is_terminal() {
            return Err(StoreError::TerminalCell {
                cell_id: cell.id,
                status: cell.status,
                event_type: "cell_status_changed",
            }
            .into());
        }
        self.ensure_fix_allowed(&cell.id)?;

        let reservations = if request.files.is_empty() {
            Vec::new()
        } else {
            let mut reserve = ReserveRequest::exclusive(agent.clone(), request.files);
            reserve.reason = request.reason.or_else(|| Some(format!("working on {}", cell.id)));
            reserve.ttl_ms = request.ttl_ms;
            self.store.reserve(&self.project, reserve)?.granted
        };

        let cell = match self.claim_cell(&cell, &agent) {
            Ok(cell) => cell,
            Err(err) => {
                if !reservations.is_empty() {
                    let paths = reservations
                        .iter()
                        .map(|row| row.path.clone())
                        .collect::<Vec<_>>();
                    if let Err(release_err) = self.store.release_paths(&self.project, &agent, &paths) {
                        tracing::warn!(cell_id = %cell.id, agent = %agent, error = %release_err, "releasing reservations after a failed start");
                    }
                }
                return Err(err);
            }
        };
        let signal_registered = self
            .store
            .register_completion_signal(&self.project, &cell.id)?;

        tracing::info!(
            project = %self.project,
            cell_id = %cell.id,
            agent = %agent,
            reserved = reservations.len(),
            "task started"
        );
        Ok(StartedTask {
            cell,
            reservations,
            signal_registered,
        })
    }

    fn claim_cell(&mut self, cell: &CellRow, agent: &str) -> Result<CellRow, GateError> {
        let mut claimed = self.store.update_cell(
            &self.project,
            &cell.id,
            CellPatch {
                assignee: Some(Some(agent.to_string())),
                ..CellPatch::default()
            },
        )?;
        if claimed.status != CellStatus::InProgress {
            claimed = self.store.set_status(
                &self.project,
                &cell.id,
                CellStatus::InProgress,
                Some(format!("started by {agent}")),
            )?;
        }
        Ok(claimed)
    }

    /// Records progress. Crossing 25/50/75% writes a checkpoint; a failed checkpoint is
    /// reported in the outcome, not raised.
    pub fn report_progress(&mut self, report: ProgressReport) -> Result<ProgressOutcome, GateError> {
        let progress = validate_progress(report.progress_percent).map_err(GateError::InvalidInput)?;
        if report.epic_id.trim().is_empty() {
            return Err(GateError::InvalidInput("epic_id must not be empty"));
        }

        let previous = match self
            .store
            .get_checkpoint(&self.project, &report.epic_id, &report.cell_id)
        {
            Ok(row) => row.map(|row| row.progress_percent),
            Err(err) => {
                tracing::warn!(cell_id = %report.cell_id, error = %err, "reading the previous checkpoint failed");
                None
            }
        };
        let milestone = crossed_milestone(previous, progress);

        let checkpoint = match milestone {
            None => PostConditionStatus::Skipped("no milestone crossed".to_string()),
            Some(milestone) => {
                let request = CheckpointRequest {
                    epic_id: report.epic_id.clone(),
                    cell_id: report.cell_id.clone(),
                    agent: report.agent.clone(),
                    progress_percent: progress,
                    files_modified: report.files_modified.clone(),
                    directives: report.directives.clone(),
                    error_context: None,
                };
                match self.store.checkpoint(&self.project, request) {
                    Ok(_) => {
                        tracing::info!(cell_id = %report.cell_id, milestone, "milestone checkpoint written");
                        PostConditionStatus::Ok
                    }
                    Err(err) => {
                        tracing::warn!(cell_id = %report.cell_id, milestone, error = %err, "auto-checkpoint failed, continuing degraded");
                        PostConditionStatus::Failed(err.to_string())
                    }
                }
            }
        };

        if let Some(message) = report.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            let from = report.agent.clone().unwrap_or_default();
            let status = self.notify_coordinator(
                &report.epic_id,
                &from,
                format!("Progress {}: {progress}%", report.cell_id),
                message.to_string(),
                Importance::Normal,
            );
            if status != PostConditionStatus::Ok {
                tracing::warn!(cell_id = %report.cell_id, ?status, "progress message not delivered");
            }
        }

        Ok(ProgressOutcome {
            progress_percent: progress,
            milestone,
            checkpoint,
        })
    }

    /// Records a review verdict. From the second rejection on every rejection is a strike;
    /// running out of attempts blocks the cell.
    pub fn record_review(&mut self, request: ReviewRequest) -> Result<ReviewOutcome, GateError> {
        let cell_id = request.cell_id.trim().to_string();
        let review = self.store.record_review(&self.project, request)?;
        let summary = self.store.review_summary(&self.project, &cell_id)?;
        let remaining_attempts = self
            .config
            .max_review_attempts
            .saturating_sub(summary.rejections);

        let mut outcome = ReviewOutcome {
            review,
            rejections: summary.rejections,
            remaining_attempts,
            strikes: None,
            blocked: false,
        };
        if outcome.review.verdict != ReviewVerdict::Rejected {
            return Ok(outcome);
        }

        if summary.rejections >= 2 {
            let reason = outcome
                .review
                .feedback
                .clone()
                .unwrap_or_else(|| "rejected in review".to_string());
            let attempt = format!("review attempt {}", summary.rejections);
            outcome.strikes = Some(self.record_strike(&cell_id, &attempt, &reason)?);
        }
        if remaining_attempts == 0 {
            outcome.blocked = self.block_cell(&cell_id, "review attempts exhausted")?;
        }
        Ok(outcome)
    }

    fn block_cell(&mut self, cell_id: &str, reason: &str) -> Result<bool, GateError> {
        let cell = self.require_cell(cell_id)?;
        match cell.status {
            CellStatus::Blocked => return Ok(true),
            CellStatus::Closed | CellStatus::Tombstone => return Ok(false),
            CellStatus::Open => {
                self.store
                    .set_status(&self.project, cell_id, CellStatus::InProgress, None)?;
            }
            CellStatus::InProgress => {}
        }
        self.store.set_status(
            &self.project,
            cell_id,
            CellStatus::Blocked,
            Some(reason.to_string()),
        )?;
        tracing::warn!(project = %self.project, cell_id, reason, "cell blocked");
        Ok(true)
    }

    /// Adds a strike. Reaching the limit escalates to the coordinator agent once.
    pub fn record_strike(
        &mut self,
        cell_id: &str,
        attempt: &str,
        reason: &str,
    ) -> Result<StrikeStatus, GateError> {
        let status = self.store.add_strike(&self.project, cell_id, attempt, reason)?;
        if status.count == STRIKE_LIMIT
            && let Some(prompt) = status.architecture_prompt.clone()
        {
            let escalation = self.notify_coordinator(
                cell_id,
                "",
                format!("Architecture review required: {cell_id}"),
                prompt,
                Importance::Urgent,
            );
            if let PostConditionStatus::Failed(error) = escalation {
                tracing::warn!(cell_id, error = %error, "strike escalation not delivered");
            }
        }
        Ok(status)
    }

    /// Refuses automated fixes for a struck-out cell.
    pub fn ensure_fix_allowed(&self, cell_id: &str) -> Result<StrikeStatus, GateError> {
        let status = self.store.get_strikes(&self.project, cell_id)?;
        if status.is_struck_out {
            return Err(GateError::StruckOut {
                cell_id: cell_id.to_string(),
                count: status.count,
                prompt: status.architecture_prompt,
            });
        }
        Ok(status)
    }

    pub fn clear_strikes(&mut self, cell_id: &str) -> Result<usize, GateError> {
        Ok(self.store.clear_strikes(&self.project, cell_id)?)
    }

    /// Runs the completion gate. Never returns an error: unexpected failures are logged,
    /// reported to the coordinator agent and come back as `FAILED`.
    pub fn complete(&mut self, request: CompletionRequest) -> CompletionResponse {
        let cell_id = request.cell_id.trim().to_string();
        match self.run_gate(&request) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    project = %self.project,
                    cell_id = %cell_id,
                    code = err.code(),
                    kind = err.kind().as_str(),
                    error = %err,
                    "completion failed"
                );
                let notified = self.notify_coordinator(
                    &cell_id,
                    &request.agent,
                    format!("Task failed: {cell_id}"),
                    format!("{}: {err}", err.code()),
                    Importance::High,
                );
                if let PostConditionStatus::Failed(error) = notified {
                    tracing::warn!(cell_id = %cell_id, error = %error, "failure notification not delivered");
                }
                CompletionResponse::failed(&cell_id, &err)
            }
        }
    }

    fn run_gate(&mut self, request: &CompletionRequest) -> Result<CompletionResponse, GateError> {
        let cell_id = request.cell_id.trim();
        let agent = request.agent.trim();
        if cell_id.is_empty() {
            return Err(GateError::InvalidInput("cell_id must not be empty"));
        }
        if agent.is_empty() {
            return Err(GateError::InvalidInput("agent must not be empty"));
        }
        let mut response = CompletionResponse::new(cell_id);

        let cell = self.require_cell(cell_id)?;
        match cell.status {
            CellStatus::Closed => {
                tracing::info!(project = %self.project, cell_id, "completion on a closed cell");
                response.enter(GateState::Closed);
                response.already_closed = true;
                return Ok(response);
            }
            CellStatus::Tombstone => {
                return Err(StoreError::TerminalCell {
                    cell_id: cell.id,
                    status: cell.status,
                    event_type: "cell_closed",
                }
                .into());
            }
            CellStatus::Open | CellStatus::InProgress | CellStatus::Blocked => {}
        }

        let strikes = self.store.get_strikes(&self.project, cell_id)?;
        response.strike_count = strikes.count;
        if strikes.is_struck_out {
            response.enter(GateState::StruckOut);
            response.architecture_prompt = strikes.architecture_prompt;
            response.hint = Some("automated fixes are disabled until a human clears the strikes".to_string());
            return Ok(response);
        }

        if request.skip_review || self.config.skip_review {
            tracing::debug!(cell_id, "review skipped");
        } else {
            let summary = self.store.review_summary(&self.project, cell_id)?;
            match summary.latest {
                None => {
                    response.enter(GateState::PendingReview);
                    response.hint = Some(format!(
                        "ask {} to review the change, then call complete again",
                        self.config.coordinator_agent
                    ));
                    return Ok(response);
                }
                Some(review) if review.verdict == ReviewVerdict::Rejected => {
                    let remaining = self
                        .config
                        .max_review_attempts
                        .saturating_sub(summary.rejections);
                    response.enter(GateState::PendingReview);
                    response.enter(GateState::NeedsChanges);
                    response.remaining_review_attempts = Some(remaining);
                    response.review_feedback = review.feedback;
                    response.hint = Some(if remaining == 0 {
                        "no review attempts left; the cell stays blocked until a human steps in"
                            .to_string()
                    } else {
                        format!("address the review feedback and resubmit ({remaining} attempts left)")
                    });
                    tracing::info!(cell_id, remaining, "completion refused, changes requested");
                    return Ok(response);
                }
                Some(_) => response.enter(GateState::PendingReview),
            }
        }

        if request.skip_verification || self.config.skip_verification {
            response.verification = Some(VerificationReport::skipped("verification disabled"));
        } else {
            let report = self.verifier.verify(cell_id, &request.files_touched);
            if !report.passed() {
                response.enter(GateState::Working);
                response.blockers = report.blockers();
                response.hint = Some("fix the blockers and call complete again".to_string());
                response.verification = Some(report);
                tracing::warn!(cell_id, blockers = response.blockers.len(), "verification failed");
                return Ok(response);
            }
            response.verification = Some(report);
        }
        response.enter(GateState::Verified);

        let contract = validate_contract(&request.files_touched, &request.files_owned);
        if !contract.is_clean() {
            tracing::warn!(cell_id, violations = ?contract.violations, "files touched outside the assignment");
        }

        let reason = request
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|summary| !summary.is_empty())
            .unwrap_or(DEFAULT_CLOSE_REASON);
        let payload = serde_json::json!({
            "success": true,
            "agent": agent,
            "summary": reason,
        });
        let started_at_ms = request.started_at_ms.unwrap_or(cell.created_at_ms);
        let outcome = SubtaskOutcome {
            epic_id: request.epic_id.clone(),
            agent: agent.to_string(),
            success: true,
            duration_ms: now_ms().saturating_sub(started_at_ms).max(0),
            files_touched: contract.files_touched.clone(),
            contract_violations: contract.violations.clone(),
            strike_count: strikes.count,
            error_count: request.error_count,
        };
        let closed = self.store.close_task(
            &self.project,
            CloseTaskRequest {
                cell_id: cell_id.to_string(),
                agent: agent.to_string(),
                reason: reason.to_string(),
                signal_payload: Some(payload),
                outcome,
            },
        )?;
        response.enter(GateState::Closed);
        if closed.close.already_closed {
            response.already_closed = true;
            return Ok(response);
        }
        if closed.signal == Some(SignalResolution::Absent) {
            tracing::debug!(cell_id, "no completion signal registered");
        }
        tracing::info!(project = %self.project, cell_id, agent, released = closed.released, "task completed");

        let memory_entry = MemoryEntry {
            cell_id: cell_id.to_string(),
            title: closed.close.cell.title.clone(),
            summary: request.summary.clone(),
            files_touched: contract.files_touched.clone(),
            ts_ms: closed.close.event.ts_ms,
        };
        let notify_body = completion_note(reason, &contract);
        response.post_conditions = vec![
            PostCondition {
                name: "blocked_cache",
                status: self.refresh_dependents(cell_id),
            },
            PostCondition {
                name: "memory",
                status: self.capture_memory(&memory_entry),
            },
            PostCondition {
                name: "export",
                status: self.export_dirty(),
            },
            PostCondition {
                name: "notify",
                status: self.notify_coordinator(
                    request.epic_id.as_deref().unwrap_or(cell_id),
                    agent,
                    format!("Task completed: {cell_id}"),
                    notify_body,
                    Importance::Normal,
                ),
            },
        ];
        for condition in &response.post_conditions {
            if let PostConditionStatus::Failed(error) = &condition.status {
                tracing::warn!(cell_id, post_condition = condition.name, error = %error, "post-condition degraded");
            }
        }
        response.contract = Some(contract);
        Ok(response)
    }

    fn refresh_dependents(&mut self, cell_id: &str) -> PostConditionStatus {
        match self
            .store
            .rebuild_dependents_blocked_cache(&self.project, cell_id)
        {
            Ok(_) => PostConditionStatus::Ok,
            Err(err) => PostConditionStatus::Failed(err.to_string()),
        }
    }

    fn capture_memory(&mut self, entry: &MemoryEntry) -> PostConditionStatus {
        match self.memory.capture(entry) {
            Ok(true) => PostConditionStatus::Ok,
            Ok(false) => PostConditionStatus::Skipped("memory capture disabled".to_string()),
            Err(err) => PostConditionStatus::Failed(err.to_string()),
        }
    }

    fn export_dirty(&mut self) -> PostConditionStatus {
        let Some(path) = self.config.export_path.clone() else {
            return PostConditionStatus::Skipped("no export path configured".to_string());
        };
        match self.store.export_dirty(&self.project, &path) {
            Ok(report) => {
                tracing::debug!(path = %report.path.display(), exported = report.exported.len(), "dirty cells exported");
                PostConditionStatus::Ok
            }
            Err(err) => PostConditionStatus::Failed(err.to_string()),
        }
    }

    fn notify_coordinator(
        &mut self,
        thread_id: &str,
        from: &str,
        subject: String,
        body: String,
        importance: Importance,
    ) -> PostConditionStatus {
        let to = self.config.coordinator_agent.trim();
        if to.is_empty() {
            return PostConditionStatus::Skipped("no coordinator agent configured".to_string());
        }
        let from = match from.trim() {
            "" => FALLBACK_SENDER,
            from => from,
        };
        let request = SendMessageRequest {
            thread_id: thread_id.to_string(),
            from: from.to_string(),
            to: vec![to.to_string()],
            subject,
            body,
            importance,
        };
        match self.messenger.send_message(request) {
            Ok(_) => PostConditionStatus::Ok,
            Err(err) => PostConditionStatus::Failed(err.to_string()),
        }
    }

    fn require_cell(&self, cell_id: &str) -> Result<CellRow, GateError> {
        self.store
            .get_cell(&self.project, cell_id)?
            .ok_or_else(|| {
                GateError::Store(StoreError::UnknownCell {
                    cell_id: cell_id.to_string(),
                })
            })
    }
}

fn completion_note(reason: &str, contract: &ContractReport) -> String {
    let mut note = format!("{reason}\nfiles touched: {}", contract.files_touched.len());
    if !contract.violations.is_empty() {
        note.push_str(&format!(
            "\noutside assignment: {}",
            contract.violations.join(", ")
        ));
    }
    note
}
