#![forbid(unsafe_code)]

use cm_core::ids::ProjectKey;
use cm_core::model::{CellStatus, DependencyKind, Importance};
use cm_storage::{
    CreateCellRequest, InboxRequest, MessageRow, ReviewRequest, ReviewVerdict, SendMessageRequest,
    SignalResolution,
};
use cm_swarm::{
    CollaboratorError, CompletionRequest, Coordinator, GateError, GateState, MemoryEntry,
    MemoryStore, Messenger, PostConditionStatus, ProgressReport, StartTaskRequest, StepReport,
    StepStatus, SwarmConfig, VerificationReport, Verifier,
};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct RecordingMessenger {
    sent: Rc<RefCell<Vec<SendMessageRequest>>>,
    fail: bool,
}

impl Messenger for RecordingMessenger {
    fn send_message(&mut self, request: SendMessageRequest) -> Result<MessageRow, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Unavailable("mail relay down".to_string()));
        }
        let row = MessageRow {
            seq: self.sent.borrow().len() as i64 + 1,
            thread_id: request.thread_id.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            subject: request.subject.clone(),
            body: request.body.clone(),
            importance: request.importance,
            created_at_ms: 0,
            read_at_ms: None,
        };
        self.sent.borrow_mut().push(request);
        Ok(row)
    }

    fn inbox(&mut self, _agent: &str) -> Result<Vec<MessageRow>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Default)]
struct RecordingMemory {
    captured: Rc<RefCell<Vec<MemoryEntry>>>,
}

impl MemoryStore for RecordingMemory {
    fn capture(&mut self, entry: &MemoryEntry) -> Result<bool, CollaboratorError> {
        self.captured.borrow_mut().push(entry.clone());
        Ok(true)
    }
}

struct StaticVerifier(VerificationReport);

impl Verifier for StaticVerifier {
    fn verify(&mut self, _cell_id: &str, _files_touched: &[String]) -> VerificationReport {
        self.0.clone()
    }
}

struct Harness {
    _dir: TempDir,
    gate: Coordinator,
    project: ProjectKey,
    messenger: RecordingMessenger,
    memory: RecordingMemory,
}

fn harness(configure: impl FnOnce(&mut SwarmConfig)) -> Harness {
    harness_with(configure, Box::new(StaticVerifier(VerificationReport::default())))
}

fn harness_with(configure: impl FnOnce(&mut SwarmConfig), verifier: Box<dyn Verifier>) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = SwarmConfig {
        storage_dir: dir.path().join("db"),
        project: "swarm".to_string(),
        ..SwarmConfig::default()
    };
    configure(&mut config);
    let messenger = RecordingMessenger::default();
    let memory = RecordingMemory::default();
    let gate = Coordinator::open(config)
        .expect("open coordinator")
        .with_messenger(Box::new(messenger.clone()))
        .with_memory(Box::new(memory.clone()))
        .with_verifier(verifier);
    let project = gate.project().clone();
    Harness {
        _dir: dir,
        gate,
        project,
        messenger,
        memory,
    }
}

impl Harness {
    fn create(&mut self, title: &str) -> String {
        self.gate
            .store_mut()
            .create_cell(&self.project, CreateCellRequest::task(title, 1))
            .expect("create cell")
            .id
    }

    fn status(&self, cell_id: &str) -> CellStatus {
        self.gate
            .store()
            .get_cell(&self.project, cell_id)
            .expect("get")
            .expect("cell")
            .status
    }

    fn review(&mut self, cell_id: &str, verdict: ReviewVerdict, feedback: &str) -> cm_swarm::ReviewOutcome {
        self.gate
            .record_review(ReviewRequest {
                cell_id: cell_id.to_string(),
                reviewer: "coordinator".to_string(),
                verdict,
                feedback: Some(feedback.to_string()),
            })
            .expect("record review")
    }

    fn subjects(&self) -> Vec<String> {
        self.messenger
            .sent
            .borrow()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }
}

fn completion(cell_id: &str, agent: &str) -> CompletionRequest {
    CompletionRequest {
        cell_id: cell_id.to_string(),
        agent: agent.to_string(),
        files_touched: vec!["src/a.ts".to_string()],
        ..CompletionRequest::default()
    }
}

#[test]
fn missing_review_is_pending_not_an_error() {
    let mut h = harness(|_| {});
    let cell = h.create("Needs eyes");

    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::PendingReview);
    assert!(response.error.is_none());
    assert!(response.hint.is_some());
    assert_eq!(h.status(&cell), CellStatus::Open);
    assert_eq!(
        h.gate
            .store()
            .events_for_cell(&h.project, &cell)
            .expect("events")
            .len(),
        1
    );
}

#[test]
fn rejections_count_down_then_block() {
    let mut h = harness(|_| {});
    let cell = h.create("Contested");

    let first = h.review(&cell, ReviewVerdict::Rejected, "missing tests");
    assert_eq!(first.remaining_attempts, 2);
    assert!(first.strikes.is_none());

    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::NeedsChanges);
    assert_eq!(response.remaining_review_attempts, Some(2));
    assert_eq!(response.review_feedback.as_deref(), Some("missing tests"));
    assert_eq!(
        response.trail,
        vec![GateState::Working, GateState::PendingReview, GateState::NeedsChanges]
    );

    let second = h.review(&cell, ReviewVerdict::Rejected, "still missing tests");
    assert_eq!(second.strikes.as_ref().map(|s| s.count), Some(1));
    assert!(!second.blocked);

    let third = h.review(&cell, ReviewVerdict::Rejected, "edge cases ignored");
    assert_eq!(third.remaining_attempts, 0);
    assert_eq!(third.strikes.as_ref().map(|s| s.count), Some(2));
    assert!(third.blocked);
    assert_eq!(h.status(&cell), CellStatus::Blocked);

    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::NeedsChanges);
    assert_eq!(response.remaining_review_attempts, Some(0));
}

#[cfg(unix)]
#[test]
fn failing_verification_keeps_the_cell_open() {
    let capture = tempfile::tempdir().expect("capture dir");
    let verification = cm_swarm::VerificationConfig {
        typecheck: vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'src/a.ts:3:1 - error TS1005: expected' >&2; exit 1".to_string(),
        ],
        tests: Vec::new(),
        timeout_ms: 10_000,
        working_dir: None,
    };
    let verifier = cm_swarm::CommandVerifier::new(verification, Box::new(cm_swarm::SearchPath::from_env()))
        .with_capture_dir(capture.path());
    let mut h = harness_with(|config| config.skip_review = true, Box::new(verifier));

    let cell = h.create("Broken build");
    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Working);
    assert_eq!(response.blockers.len(), 1);
    let blocker = &response.blockers[0];
    assert_eq!(blocker.step, "typecheck");
    assert_eq!(
        blocker.location.as_ref().map(ToString::to_string).as_deref(),
        Some("src/a.ts:3:1")
    );
    assert!(blocker.rerun.starts_with("sh -c"));
    assert_eq!(h.status(&cell), CellStatus::Open);
}

#[test]
fn verification_blockers_come_back_without_closing() {
    let failing = VerificationReport {
        skipped_reason: None,
        steps: vec![StepReport {
            name: "tests".to_string(),
            command: vec!["npm".to_string(), "test".to_string()],
            status: StepStatus::TimedOut,
            exit_code: None,
            duration_ms: 300_000,
            output_tail: String::new(),
            location: None,
        }],
    };
    let mut h = harness_with(
        |config| config.skip_review = true,
        Box::new(StaticVerifier(failing)),
    );

    let cell = h.create("Slow suite");
    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Working);
    assert_eq!(response.blockers[0].rerun, "npm test");
    assert!(response.blockers[0].hint.contains("timeout_ms"));
    assert_eq!(h.status(&cell), CellStatus::Open);
    assert!(
        h.gate
            .store()
            .events_for_cell(&h.project, &cell)
            .expect("events")
            .iter()
            .all(|e| e.event_type() != "cell_closed")
    );
}

#[test]
fn approved_work_closes_with_every_post_condition() {
    let export = tempfile::tempdir().expect("export dir");
    let export_path = export.path().join("cells.jsonl");
    let path_for_config = export_path.clone();
    let mut h = harness(move |config| config.export_path = Some(path_for_config));
    let a = h.create("Ship login");
    let b = h.create("Ship logout");
    h.gate
        .store_mut()
        .add_dependency(&h.project, &b, &a, DependencyKind::Blocks)
        .expect("b waits on a");
    h.gate
        .store_mut()
        .rebuild_all_blocked_cache(&h.project)
        .expect("rebuild");
    assert!(h.gate.store().is_blocked(&h.project, &b).expect("blocked"));

    let started = h
        .gate
        .start_task(StartTaskRequest {
            cell_id: a.clone(),
            agent: "alice".to_string(),
            files: vec!["src/a.ts".to_string()],
            ..StartTaskRequest::default()
        })
        .expect("start");
    assert!(started.signal_registered);
    assert_eq!(started.cell.status, CellStatus::InProgress);
    assert_eq!(started.cell.assignee.as_deref(), Some("alice"));
    assert_eq!(started.reservations.len(), 1);

    h.review(&a, ReviewVerdict::Approved, "lgtm");
    let mut request = completion(&a, "alice");
    request.summary = Some("login shipped".to_string());
    request.files_owned = vec!["src/a.ts".to_string()];
    request.files_touched.push("src/other.ts".to_string());
    request.epic_id = Some("epic-1".to_string());
    let response = h.gate.complete(request);

    assert_eq!(response.state, GateState::Closed, "{response:?}");
    assert_eq!(
        response.trail,
        vec![
            GateState::Working,
            GateState::PendingReview,
            GateState::Verified,
            GateState::Closed
        ]
    );
    assert!(!response.already_closed);
    for name in ["blocked_cache", "memory", "export", "notify"] {
        assert_eq!(
            response.post_condition(name),
            Some(&PostConditionStatus::Ok),
            "post-condition {name}"
        );
    }
    let contract = response.contract.as_ref().expect("contract");
    assert_eq!(contract.violations, vec!["src/other.ts".to_string()]);

    let cell = h
        .gate
        .store()
        .get_cell(&h.project, &a)
        .expect("get")
        .expect("cell");
    assert_eq!(cell.status, CellStatus::Closed);
    assert_eq!(cell.closed_reason.as_deref(), Some("login shipped"));
    assert!(!h.gate.store().is_blocked(&h.project, &b).expect("unblocked"));
    assert!(h.gate.store().list_reservations(&h.project).expect("list").is_empty());
    assert_eq!(
        h.gate
            .store_mut()
            .resolve_completion_signal(&h.project, &a, None)
            .expect("resolve"),
        SignalResolution::AlreadyResolved
    );

    let events = h
        .gate
        .store()
        .events_for_cell(&h.project, &a)
        .expect("events");
    let last = events.last().expect("events");
    match &last.event {
        cm_core::events::CellEvent::SubtaskOutcome(outcome) => {
            assert!(outcome.success);
            assert_eq!(outcome.agent, "alice");
            assert_eq!(outcome.epic_id.as_deref(), Some("epic-1"));
            assert_eq!(outcome.contract_violations, vec!["src/other.ts".to_string()]);
        }
        other => panic!("expected subtask_outcome, got {other:?}"),
    }

    assert!(export_path.exists());
    assert_eq!(h.memory.captured.borrow().len(), 1);
    assert_eq!(h.memory.captured.borrow()[0].title, "Ship login");
    assert_eq!(h.subjects(), vec![format!("Task completed: {a}")]);
}

#[test]
fn completing_twice_has_no_second_effect() {
    let mut h = harness(|config| config.skip_review = true);
    let cell = h.create("Once only");
    let first = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(first.state, GateState::Closed);
    let seq = h.gate.store().last_event_seq(&h.project).expect("seq");
    let sent = h.messenger.sent.borrow().len();

    let second = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(second.state, GateState::Closed);
    assert!(second.already_closed);
    assert!(second.post_conditions.is_empty());
    assert_eq!(h.gate.store().last_event_seq(&h.project).expect("seq"), seq);
    assert_eq!(h.messenger.sent.borrow().len(), sent);
}

fn outcome_count(h: &Harness, cell_id: &str) -> usize {
    h.gate
        .store()
        .events_for_cell(&h.project, cell_id)
        .expect("events")
        .iter()
        .filter(|e| e.event_type() == "subtask_outcome")
        .count()
}

#[test]
fn failure_inside_the_close_leaves_the_task_untouched() {
    let mut h = harness(|config| config.skip_review = true);
    let cell = h.create("All or nothing");
    h.gate
        .start_task(StartTaskRequest {
            cell_id: cell.clone(),
            agent: "alice".to_string(),
            files: vec!["src/a.ts".to_string()],
            ..StartTaskRequest::default()
        })
        .expect("start");

    // Signal resolution runs after the close event inside the same transaction.
    let raw = rusqlite::Connection::open(h.gate.store().db_path()).expect("raw connection");
    raw.execute_batch(
        "CREATE TRIGGER refuse_signal BEFORE UPDATE ON completion_signals
         BEGIN SELECT RAISE(ABORT, 'signal store offline'); END;",
    )
    .expect("create trigger");

    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Failed);
    assert_eq!(h.status(&cell), CellStatus::InProgress);
    assert_eq!(h.gate.store().list_reservations(&h.project).expect("list").len(), 1);
    assert!(
        h.gate
            .store()
            .events_for_cell(&h.project, &cell)
            .expect("events")
            .iter()
            .all(|e| e.event_type() != "cell_closed")
    );
    assert_eq!(outcome_count(&h, &cell), 0);

    raw.execute_batch("DROP TRIGGER refuse_signal;").expect("drop trigger");
    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Closed, "{response:?}");
    assert!(!response.already_closed);
    assert!(h.gate.store().list_reservations(&h.project).expect("list").is_empty());
    assert_eq!(
        h.gate
            .store_mut()
            .resolve_completion_signal(&h.project, &cell, None)
            .expect("resolve"),
        SignalResolution::AlreadyResolved
    );
    assert_eq!(outcome_count(&h, &cell), 1);
}

#[test]
fn overlong_agent_is_refused_before_the_close() {
    let mut h = harness(|config| config.skip_review = true);
    let cell = h.create("Long name");
    h.gate
        .store_mut()
        .register_completion_signal(&h.project, &cell)
        .expect("register signal");

    let response = h.gate.complete(completion(&cell, &"a".repeat(129)));
    assert_eq!(response.state, GateState::Failed);
    assert_eq!(response.error.as_ref().map(|e| e.code), Some("INVALID_INPUT"));
    assert_eq!(h.status(&cell), CellStatus::Open);
    assert_eq!(outcome_count(&h, &cell), 0);

    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Closed);
    assert!(!response.already_closed);
    assert_eq!(outcome_count(&h, &cell), 1);
    assert_eq!(
        h.gate
            .store_mut()
            .resolve_completion_signal(&h.project, &cell, None)
            .expect("resolve"),
        SignalResolution::AlreadyResolved
    );
}

#[test]
fn struck_out_cells_wait_for_a_human() {
    let mut h = harness(|config| config.skip_review = true);
    let cell = h.create("Flaky parser");
    for (attempt, reason) in [
        ("null check", "still panics"),
        ("retry loop", "times out"),
        ("rewrite", "new regression"),
    ] {
        h.gate
            .record_strike(&cell, attempt, reason)
            .expect("strike");
    }
    let escalations = h
        .messenger
        .sent
        .borrow()
        .iter()
        .filter(|m| m.importance == Importance::Urgent)
        .count();
    assert_eq!(escalations, 1);

    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::StruckOut);
    assert_eq!(response.strike_count, 3);
    assert!(
        response
            .architecture_prompt
            .as_deref()
            .is_some_and(|p| p.contains("Flaky parser"))
    );
    assert!(matches!(
        h.gate.ensure_fix_allowed(&cell),
        Err(GateError::StruckOut { count: 3, .. })
    ));
    assert!(
        h.gate
            .start_task(StartTaskRequest {
                cell_id: cell.clone(),
                agent: "alice".to_string(),
                ..StartTaskRequest::default()
            })
            .is_err()
    );

    assert_eq!(h.gate.clear_strikes(&cell).expect("clear"), 3);
    let response = h.gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Closed);
}

#[test]
fn unexpected_errors_become_failed_and_reach_the_coordinator() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut gate = Coordinator::open(SwarmConfig {
        storage_dir: dir.path().to_path_buf(),
        project: "swarm".to_string(),
        ..SwarmConfig::default()
    })
    .expect("open");

    let response = gate.complete(completion("nope-1", "alice"));
    assert_eq!(response.state, GateState::Failed);
    let error = response.error.expect("error");
    assert_eq!(error.code, "UNKNOWN_CELL");
    assert_eq!(error.kind, "not_found");

    let project = gate.project().clone();
    let inbox = gate
        .store()
        .inbox(
            &project,
            InboxRequest {
                agent: "coordinator".to_string(),
                unread_only: true,
                limit: 0,
            },
        )
        .expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].subject, "Task failed: nope-1");
    assert_eq!(inbox[0].from, "alice");
    assert_eq!(inbox[0].importance, Importance::High);
}

#[test]
fn degraded_post_conditions_do_not_undo_the_close() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut gate = Coordinator::open(SwarmConfig {
        storage_dir: dir.path().to_path_buf(),
        project: "swarm".to_string(),
        skip_review: true,
        ..SwarmConfig::default()
    })
    .expect("open")
    .with_messenger(Box::new(RecordingMessenger {
        fail: true,
        ..RecordingMessenger::default()
    }))
    .with_verifier(Box::new(StaticVerifier(VerificationReport::default())));
    let project = gate.project().clone();
    let cell = gate
        .store_mut()
        .create_cell(&project, CreateCellRequest::task("Quiet close", 1))
        .expect("create")
        .id;

    let response = gate.complete(completion(&cell, "alice"));
    assert_eq!(response.state, GateState::Closed);
    assert!(matches!(
        response.post_condition("notify"),
        Some(PostConditionStatus::Failed(_))
    ));
    assert!(matches!(
        response.post_condition("memory"),
        Some(PostConditionStatus::Skipped(_))
    ));
    assert!(matches!(
        response.post_condition("export"),
        Some(PostConditionStatus::Skipped(_))
    ));
    assert_eq!(
        gate.store()
            .get_cell(&project, &cell)
            .expect("get")
            .expect("cell")
            .status,
        CellStatus::Closed
    );
}

#[test]
fn starting_on_reserved_files_leaves_the_cell_alone() {
    let mut h = harness(|_| {});
    let first = h.create("First");
    let second = h.create("Second");
    h.gate
        .start_task(StartTaskRequest {
            cell_id: first,
            agent: "alice".to_string(),
            files: vec!["src/shared.ts".to_string()],
            ..StartTaskRequest::default()
        })
        .expect("alice starts");

    let err = h
        .gate
        .start_task(StartTaskRequest {
            cell_id: second.clone(),
            agent: "bob".to_string(),
            files: vec!["src/shared.ts".to_string()],
            ..StartTaskRequest::default()
        })
        .expect_err("bob is refused");
    assert_eq!(err.code(), "RESERVATION_CONFLICT");

    let cell = h
        .gate
        .store()
        .get_cell(&h.project, &second)
        .expect("get")
        .expect("cell");
    assert_eq!(cell.status, CellStatus::Open);
    assert_eq!(cell.assignee, None);
}

#[test]
fn progress_checkpoints_only_when_a_milestone_is_crossed() {
    let mut h = harness(|_| {});
    let cell = h.create("Long haul");
    let mut report = |percent: u8, message: Option<&str>| {
        h.gate
            .report_progress(ProgressReport {
                epic_id: "epic-1".to_string(),
                cell_id: cell.clone(),
                agent: Some("alice".to_string()),
                progress_percent: percent,
                files_modified: vec!["src/a.ts".to_string()],
                message: message.map(str::to_string),
                ..ProgressReport::default()
            })
            .expect("progress")
    };

    let early = report(10, None);
    assert_eq!(early.milestone, None);
    assert!(matches!(early.checkpoint, PostConditionStatus::Skipped(_)));

    let quarter = report(30, Some("parser done"));
    assert_eq!(quarter.milestone, Some(25));
    assert_eq!(quarter.checkpoint, PostConditionStatus::Ok);

    assert_eq!(report(40, None).milestone, None);
    assert_eq!(report(80, None).milestone, Some(75));

    let snapshot = h
        .gate
        .store()
        .get_checkpoint(&h.project, "epic-1", &cell)
        .expect("read")
        .expect("snapshot");
    assert_eq!(snapshot.progress_percent, 80);
    assert_eq!(snapshot.recovery.milestone, Some(75));
    assert_eq!(h.subjects(), vec![format!("Progress {cell}: 30%")]);

    let err = h
        .gate
        .report_progress(ProgressReport {
            epic_id: "epic-1".to_string(),
            cell_id: cell.clone(),
            progress_percent: 120,
            ..ProgressReport::default()
        })
        .expect_err("out of range");
    assert_eq!(err.code(), "INVALID_INPUT");
}
