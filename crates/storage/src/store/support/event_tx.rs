#![forbid(unsafe_code)]

use super::super::{StoreError, StoredEvent};
use super::time::now_ms;
use cm_core::events::CellEvent;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub(in crate::store) const EVENT_COLUMNS: &str = "seq, ts_ms, project, cell_id, payload_json";

pub(in crate::store) fn ensure_project_tx(
    conn: &Connection,
    project: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO projects(project, created_at_ms) VALUES (?1, ?2)",
        params![project, now_ms],
    )?;
    Ok(())
}

pub(in crate::store) fn next_counter_tx(
    conn: &Connection,
    project: &str,
    name: &str,
) -> Result<i64, StoreError> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM counters WHERE project=?1 AND name=?2",
            params![project, name],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    conn.execute(
        r#"
        INSERT INTO counters(project, name, value) VALUES (?1, ?2, ?3)
        ON CONFLICT(project, name) DO UPDATE SET value=excluded.value
        "#,
        params![project, name, next],
    )?;
    Ok(next)
}

/// Wall clock, clamped so timestamps never run backwards within a project.
fn next_event_ts_tx(conn: &Connection, project: &str) -> Result<i64, StoreError> {
    let last: Option<i64> = conn
        .query_row(
            "SELECT ts_ms FROM events WHERE project=?1 ORDER BY seq DESC LIMIT 1",
            params![project],
            |row| row.get(0),
        )
        .optional()?;
    Ok(now_ms().max(last.unwrap_or(0)))
}

pub(in crate::store) fn insert_event_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    event: &CellEvent,
) -> Result<StoredEvent, StoreError> {
    let ts_ms = next_event_ts_tx(conn, project)?;
    ensure_project_tx(conn, project, ts_ms)?;
    let payload_json = event.to_payload_json()?;
    conn.execute(
        r#"
        INSERT INTO events(project, cell_id, ts_ms, type, payload_json)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![project, cell_id, ts_ms, event.event_type(), payload_json],
    )?;
    let seq = conn.last_insert_rowid();
    Ok(StoredEvent {
        seq,
        ts_ms,
        project: project.to_string(),
        cell_id: cell_id.to_string(),
        event: event.clone(),
    })
}

pub(in crate::store) fn read_event_row(row: &Row<'_>) -> Result<StoredEvent, rusqlite::Error> {
    let payload_json: String = row.get(4)?;
    let event = CellEvent::from_payload_json(&payload_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?;
    Ok(StoredEvent {
        seq: row.get(0)?,
        ts_ms: row.get(1)?,
        project: row.get(2)?,
        cell_id: row.get(3)?,
        event,
    })
}

/// Latest event of one type for a cell.
pub(in crate::store) fn last_event_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    event_type: &str,
) -> Result<Option<StoredEvent>, StoreError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE project=?1 AND cell_id=?2 AND type=?3 ORDER BY seq DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![project, cell_id, event_type], read_event_row)
        .optional()?)
}
