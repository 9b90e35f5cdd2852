#![forbid(unsafe_code)]

use cm_core::events::{CellEvent, FieldChange, SubtaskOutcome};
use cm_core::ids::ProjectKey;
use cm_core::model::{CellStatus, CellType, DependencyKind};
use cm_storage::{
    CellPatch, CellQuery, CreateCellRequest, ErrorKind, EventFilter, SqliteStore, StoreError,
};
use rusqlite::{Connection, params};
use tempfile::TempDir;

fn open_store() -> (TempDir, SqliteStore, ProjectKey) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = SqliteStore::open(dir.path()).expect("open store");
    let project = ProjectKey::try_new("acme/web").expect("project key");
    store.project_init(&project).expect("project init");
    (dir, store, project)
}

fn event_count(store: &SqliteStore) -> i64 {
    let conn = Connection::open(store.db_path()).expect("open raw connection");
    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
        .expect("count events")
}

#[test]
fn schema_is_installed_on_open() {
    let (_dir, store, project) = open_store();
    assert_eq!(store.schema_version().expect("version").as_deref(), Some("v1"));
    assert!(store.project_exists(&project).expect("project exists"));
}

#[test]
fn create_cell_generates_counter_ids_and_starts_open() {
    let (_dir, mut store, project) = open_store();
    let first = store
        .create_cell(&project, CreateCellRequest::task("First", 1))
        .expect("create first");
    let second = store
        .create_cell(&project, CreateCellRequest::task("Second", 1))
        .expect("create second");
    assert_eq!(first.id, "web-1");
    assert_eq!(second.id, "web-2");
    assert_eq!(first.status, CellStatus::Open);
    assert_eq!(first.cell_type, CellType::Task);

    let events = store.events_for_cell(&project, "web-1").expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "cell_created");
}

#[test]
fn duplicate_create_is_a_conflict_and_writes_nothing() {
    let (_dir, mut store, project) = open_store();
    let mut request = CreateCellRequest::task("Once", 1);
    request.id = Some("fixed-1".to_string());
    store.create_cell(&project, request.clone()).expect("create");
    let before = event_count(&store);

    let err = store.create_cell(&project, request).expect_err("duplicate");
    assert!(matches!(err, StoreError::DuplicateCell { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(event_count(&store), before);
}

#[test]
fn events_are_ordered_and_timestamps_monotonic() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Ordered", 2))
        .expect("create");
    for label in ["a", "b", "c"] {
        store.add_label(&project, &cell.id, label).expect("label");
    }
    store
        .add_comment(&project, &cell.id, "alice", "looking into it")
        .expect("comment");

    let events = store.events_for_cell(&project, &cell.id).expect("events");
    assert_eq!(events.len(), 5);
    for pair in events.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
        assert!(pair[0].ts_ms <= pair[1].ts_ms);
    }
    assert_eq!(
        store.get_labels(&project, &cell.id).expect("labels"),
        vec!["a", "b", "c"]
    );
    let comments = store.get_comments(&project, &cell.id).expect("comments");
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].author, "alice");
}

#[test]
fn cursor_can_resume_from_last_seen_seq() {
    let (_dir, mut store, project) = open_store();
    for i in 0..5 {
        store
            .create_cell(&project, CreateCellRequest::task(format!("cell {i}"), 1))
            .expect("create");
    }

    let mut cursor = store.read_events(
        &project,
        EventFilter {
            limit: Some(2),
            ..EventFilter::default()
        },
    );
    let first_page = cursor
        .by_ref()
        .collect::<Result<Vec<_>, _>>()
        .expect("first page");
    assert_eq!(first_page.len(), 2);
    let resume_at = cursor.position();
    assert_eq!(resume_at, first_page[1].seq);

    let rest = store
        .read_events(
            &project,
            EventFilter {
                after_seq: Some(resume_at),
                ..EventFilter::default()
            },
        )
        .collect::<Result<Vec<_>, _>>()
        .expect("rest");
    assert_eq!(rest.len(), 3);
    assert!(rest.iter().all(|event| event.seq > resume_at));
}

#[test]
fn cursor_filters_by_event_type() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Filtered", 1))
        .expect("create");
    store.add_label(&project, &cell.id, "x").expect("label");
    let closed = store
        .read_events(
            &project,
            EventFilter {
                event_types: vec!["cell_label_added".to_string()],
                ..EventFilter::default()
            },
        )
        .collect::<Result<Vec<_>, _>>()
        .expect("filtered");
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].event_type(), "cell_label_added");
}

#[test]
fn status_machine_is_enforced() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Machine", 1))
        .expect("create");

    let err = store
        .set_status(&project, &cell.id, CellStatus::Blocked, None)
        .expect_err("open -> blocked is not allowed");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
    assert_eq!(err.kind(), ErrorKind::FatalInvariant);

    store
        .set_status(&project, &cell.id, CellStatus::InProgress, None)
        .expect("start");
    store
        .set_status(&project, &cell.id, CellStatus::Blocked, Some("waiting".into()))
        .expect("block");
    let back = store
        .set_status(&project, &cell.id, CellStatus::InProgress, None)
        .expect("unblock");
    assert_eq!(back.status, CellStatus::InProgress);
}

#[test]
fn closed_cells_reject_mutations_but_accept_audit_events() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Terminal", 1))
        .expect("create");
    store.close_cell(&project, &cell.id, "done").expect("close");

    let err = store
        .append_event(
            &project,
            &cell.id,
            CellEvent::CellUpdated {
                changes: vec![FieldChange::Priority { old: 1, new: 9 }],
            },
        )
        .expect_err("mutation after close");
    match err {
        StoreError::TerminalCell {
            status, event_type, ..
        } => {
            assert_eq!(status, CellStatus::Closed);
            assert_eq!(event_type, "cell_updated");
        }
        other => panic!("expected TerminalCell, got {other:?}"),
    }

    let audit = store
        .append_event(
            &project,
            &cell.id,
            CellEvent::SubtaskOutcome(SubtaskOutcome {
                agent: "alice".to_string(),
                success: true,
                ..SubtaskOutcome::default()
            }),
        )
        .expect("audit event on closed cell");
    assert!(!audit.deduped);
    assert_eq!(
        store.get_cell(&project, &cell.id).expect("get").expect("cell").status,
        CellStatus::Closed
    );
}

#[test]
fn closing_twice_is_idempotent() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Twice", 1))
        .expect("create");
    let first = store.close_cell(&project, &cell.id, "shipped").expect("close");
    store.clear_dirty(&project, &cell.id).expect("clear dirty");
    let events_after_first = event_count(&store);

    let second = store.close_cell(&project, &cell.id, "again").expect("re-close");
    assert!(!first.already_closed);
    assert!(second.already_closed);
    assert_eq!(second.event.seq, first.event.seq);
    assert_eq!(first.cell, second.cell);
    assert_eq!(second.cell.closed_reason.as_deref(), Some("shipped"));
    assert_eq!(event_count(&store), events_after_first);
    assert!(store.get_dirty_cells(&project).expect("dirty").is_empty());
}

#[test]
fn reclose_after_status_change_returns_the_status_event() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Via status", 1))
        .expect("create");
    store
        .set_status(&project, &cell.id, CellStatus::InProgress, None)
        .expect("start");
    store
        .set_status(&project, &cell.id, CellStatus::Closed, Some("merged".to_string()))
        .expect("close via status");
    store
        .append_event(
            &project,
            &cell.id,
            CellEvent::SubtaskOutcome(SubtaskOutcome {
                agent: "alice".to_string(),
                success: true,
                ..SubtaskOutcome::default()
            }),
        )
        .expect("outcome");

    let again = store.close_cell(&project, &cell.id, "again").expect("re-close");
    assert!(again.already_closed);
    assert_eq!(again.event.event_type(), "cell_status_changed");
}

#[test]
fn update_cell_records_only_changed_fields() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Before", 1))
        .expect("create");
    let updated = store
        .update_cell(
            &project,
            &cell.id,
            CellPatch {
                title: Some("After".to_string()),
                priority: Some(1),
                assignee: Some(Some("bob".to_string())),
                ..CellPatch::default()
            },
        )
        .expect("update");
    assert_eq!(updated.title, "After");
    assert_eq!(updated.assignee.as_deref(), Some("bob"));

    let events = store.events_for_cell(&project, &cell.id).expect("events");
    let last = events.last().expect("last event");
    match &last.event {
        CellEvent::CellUpdated { changes } => {
            let fields = changes.iter().map(FieldChange::field_name).collect::<Vec<_>>();
            assert_eq!(fields, vec!["title", "assignee"]);
        }
        other => panic!("expected cell_updated, got {other:?}"),
    }

    let unchanged = store
        .update_cell(&project, &cell.id, CellPatch::default())
        .expect("no-op update");
    assert_eq!(unchanged, updated);
    assert_eq!(
        store.events_for_cell(&project, &cell.id).expect("events").len(),
        events.len()
    );
}

#[test]
fn stale_update_is_last_applied_wins() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Shared", 1))
        .expect("create");
    for (old, new) in [(1, 5), (1, 7)] {
        store
            .append_event(
                &project,
                &cell.id,
                CellEvent::CellUpdated {
                    changes: vec![FieldChange::Priority { old, new }],
                },
            )
            .expect("update");
    }
    let cell = store.get_cell(&project, &cell.id).expect("get").expect("cell");
    assert_eq!(cell.priority, 7);
}

#[test]
fn dirty_set_tracks_mutations_and_clears_idempotently() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Dirty", 1))
        .expect("create");
    assert_eq!(store.get_dirty_cells(&project).expect("dirty"), vec![cell.id.clone()]);
    assert!(store.clear_dirty(&project, &cell.id).expect("clear"));
    assert!(!store.clear_dirty(&project, &cell.id).expect("clear again"));
    assert!(store.get_dirty_cells(&project).expect("dirty").is_empty());

    store.add_label(&project, &cell.id, "p1").expect("label");
    assert_eq!(store.get_dirty_cells(&project).expect("dirty"), vec![cell.id]);
}

#[test]
fn query_cells_filters_by_status_type_and_parent() {
    let (_dir, mut store, project) = open_store();
    let mut epic = CreateCellRequest::task("Epic", 5);
    epic.cell_type = CellType::Epic;
    let epic = store.create_cell(&project, epic).expect("epic");

    for (title, priority) in [("Child A", 1), ("Child B", 3)] {
        let mut child = CreateCellRequest::task(title, priority);
        child.parent_id = Some(epic.id.clone());
        store.create_cell(&project, child).expect("child");
    }

    let children = store
        .query_cells(
            &project,
            CellQuery {
                parent_id: Some(epic.id.clone()),
                ..CellQuery::default()
            },
        )
        .expect("children");
    assert_eq!(
        children.iter().map(|c| c.title.as_str()).collect::<Vec<_>>(),
        vec!["Child B", "Child A"]
    );

    let epics = store
        .query_cells(
            &project,
            CellQuery {
                cell_type: Some(CellType::Epic),
                status: Some(CellStatus::Open),
                limit: 10,
                ..CellQuery::default()
            },
        )
        .expect("epics");
    assert_eq!(epics.len(), 1);

    store
        .close_cell(&project, &children[0].id, "done")
        .expect("close child");
    let progress = store.epic_progress(&project, &epic.id).expect("progress");
    assert_eq!(progress.total, 2);
    assert_eq!(progress.closed, 1);
    assert_eq!(progress.open, 1);
    assert_eq!(progress.percent_closed(), 50);
}

#[test]
fn tombstone_is_terminal() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Gone", 1))
        .expect("create");
    store
        .tombstone_cell(&project, &cell.id, Some("duplicate".into()))
        .expect("tombstone");
    let err = store
        .close_cell(&project, &cell.id, "late")
        .expect_err("close after tombstone");
    assert!(matches!(err, StoreError::TerminalCell { .. }));
}

#[test]
fn replay_reproduces_identical_projections() {
    let (_dir, mut store, project) = open_store();
    let a = store
        .create_cell(&project, CreateCellRequest::task("A", 2))
        .expect("a");
    let b = store
        .create_cell(&project, CreateCellRequest::task("B", 1))
        .expect("b");
    store
        .add_dependency(&project, &b.id, &a.id, DependencyKind::Blocks)
        .expect("dep");
    store.add_label(&project, &a.id, "backend").expect("label");
    store
        .update_cell(
            &project,
            &b.id,
            CellPatch {
                description: Some(Some("needs A".into())),
                ..CellPatch::default()
            },
        )
        .expect("update");
    store
        .set_status(&project, &a.id, CellStatus::InProgress, None)
        .expect("start");
    store.close_cell(&project, &a.id, "done").expect("close");
    store
        .add_comment(&project, &b.id, "carol", "unblocked now")
        .expect("comment");

    let before = store
        .query_cells(&project, CellQuery::default())
        .expect("cells before");
    let labels_before = store.get_labels(&project, &a.id).expect("labels");
    let deps_before = store.get_dependencies(&project, &b.id).expect("deps");

    let replayed = store.rebuild_projections(&project).expect("rebuild");
    assert_eq!(replayed as i64, event_count(&store));

    let after = store
        .query_cells(&project, CellQuery::default())
        .expect("cells after");
    assert_eq!(before, after);
    assert_eq!(store.get_labels(&project, &a.id).expect("labels"), labels_before);
    assert_eq!(store.get_dependencies(&project, &b.id).expect("deps"), deps_before);
    assert!(!store.is_blocked(&project, &b.id).expect("blocked"));
}

#[test]
fn event_rows_are_never_rewritten() {
    let (_dir, mut store, project) = open_store();
    let cell = store
        .create_cell(&project, CreateCellRequest::task("Immutable", 1))
        .expect("create");
    let original = store.events_for_cell(&project, &cell.id).expect("events");
    store
        .update_cell(
            &project,
            &cell.id,
            CellPatch {
                title: Some("Renamed".into()),
                ..CellPatch::default()
            },
        )
        .expect("update");

    let conn = Connection::open(store.db_path()).expect("raw");
    let payload: String = conn
        .query_row(
            "SELECT payload_json FROM events WHERE seq=?1",
            params![original[0].seq],
            |row| row.get(0),
        )
        .expect("payload");
    assert_eq!(
        CellEvent::from_payload_json(&payload).expect("parse"),
        original[0].event
    );
}
