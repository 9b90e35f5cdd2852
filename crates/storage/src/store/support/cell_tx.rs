#![forbid(unsafe_code)]

use super::super::{CellRow, StoreError};
use cm_core::ids::validate_cell_id;
use cm_core::model::{CellStatus, CellType};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub(in crate::store) const CELL_COLUMNS: &str = "id, title, description, cell_type, status, priority, parent_id, assignee, created_at_ms, updated_at_ms, closed_at_ms, closed_reason, last_seq";

pub(in crate::store) const MAX_AGENT_LEN: usize = 128;

fn invalid_column(index: usize, message: &'static str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

pub(in crate::store) fn read_cell_row(row: &Row<'_>) -> Result<CellRow, rusqlite::Error> {
    let cell_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(CellRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        cell_type: CellType::parse(&cell_type).ok_or_else(|| invalid_column(3, "unknown cell_type"))?,
        status: CellStatus::parse(&status).ok_or_else(|| invalid_column(4, "unknown status"))?,
        priority: row.get(5)?,
        parent_id: row.get(6)?,
        assignee: row.get(7)?,
        created_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
        closed_at_ms: row.get(10)?,
        closed_reason: row.get(11)?,
        last_seq: row.get(12)?,
    })
}

pub(in crate::store) fn load_cell_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
) -> Result<Option<CellRow>, StoreError> {
    let sql = format!("SELECT {CELL_COLUMNS} FROM cells WHERE project=?1 AND id=?2");
    Ok(conn
        .query_row(&sql, params![project, cell_id], read_cell_row)
        .optional()?)
}

pub(in crate::store) fn require_cell_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
) -> Result<CellRow, StoreError> {
    load_cell_tx(conn, project, cell_id)?.ok_or_else(|| StoreError::UnknownCell {
        cell_id: cell_id.to_string(),
    })
}

pub(in crate::store) fn cell_exists_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM cells WHERE project=?1 AND id=?2",
            params![project, cell_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(in crate::store) fn mark_dirty_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    now_ms: i64,
    seq: i64,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO dirty_cells(project, cell_id, marked_at_ms, mark_seq) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(project, cell_id) DO UPDATE SET
          marked_at_ms=excluded.marked_at_ms,
          mark_seq=MAX(mark_seq, excluded.mark_seq)
        "#,
        params![project, cell_id, now_ms, seq],
    )?;
    Ok(())
}

pub(in crate::store) fn touch_cell_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    ts_ms: i64,
    seq: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE cells SET updated_at_ms=?3, last_seq=?4 WHERE project=?1 AND id=?2",
        params![project, cell_id, ts_ms, seq],
    )?;
    Ok(())
}

pub(in crate::store) fn check_cell_id(cell_id: &str) -> Result<(), StoreError> {
    validate_cell_id(cell_id).map_err(|err| StoreError::InvalidInput(err.message()))
}

pub(in crate::store) fn normalize_agent(raw: &str, field: &'static str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput(field));
    }
    if raw.len() > MAX_AGENT_LEN {
        return Err(StoreError::InvalidInput("agent id too long"));
    }
    Ok(raw.to_string())
}

pub(in crate::store) fn encode_string_list(values: &[String]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(values)?)
}

pub(in crate::store) fn decode_string_list(raw: &str) -> Result<Vec<String>, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

pub(in crate::store) fn to_sqlite_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}
