#![forbid(unsafe_code)]

use super::*;
use cm_core::events::FieldChange;
use rusqlite::ToSql;

const MAX_TITLE_LEN: usize = 500;
const MAX_LABEL_LEN: usize = 64;

/// Rejects an event the current projection cannot accept.
///
/// Runs before the event row is written, and again during replay.
pub(in crate::store) fn validate_event_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    event: &CellEvent,
) -> Result<(), StoreError> {
    check_cell_id(cell_id)?;
    if event.is_audit() {
        return Ok(());
    }

    if let CellEvent::CellCreated { title, .. } = event {
        if cell_exists_tx(conn, project, cell_id)? {
            return Err(StoreError::DuplicateCell {
                cell_id: cell_id.to_string(),
            });
        }
        return check_title(title);
    }

    let cell = require_cell_tx(conn, project, cell_id)?;
    if cell.status.is_terminal() {
        return Err(StoreError::TerminalCell {
            cell_id: cell_id.to_string(),
            status: cell.status,
            event_type: event.event_type(),
        });
    }

    match event {
        CellEvent::CellUpdated { changes } => {
            if changes.is_empty() {
                return Err(StoreError::InvalidInput("cell_updated carries no changes"));
            }
            for change in changes {
                if let FieldChange::Title { new, .. } = change {
                    check_title(new)?;
                }
            }
        }
        CellEvent::CellStatusChanged { from, to, .. } => {
            if *from != cell.status {
                tracing::debug!(
                    cell_id,
                    stated = %from,
                    actual = %cell.status,
                    "status change stated a stale source status"
                );
            }
            if !cell.status.can_transition_to(*to) {
                return Err(StoreError::InvalidTransition {
                    cell_id: cell_id.to_string(),
                    from: cell.status,
                    to: *to,
                });
            }
        }
        CellEvent::CellDependencyAdded { depends_on, .. } => {
            check_cell_id(depends_on)?;
            if depends_on == cell_id {
                return Err(StoreError::InvalidInput("a cell cannot depend on itself"));
            }
            if !cell_exists_tx(conn, project, depends_on)? {
                return Err(StoreError::UnknownCell {
                    cell_id: depends_on.clone(),
                });
            }
        }
        CellEvent::CellLabelAdded { label } | CellEvent::CellLabelRemoved { label } => {
            check_label(label)?;
        }
        CellEvent::CellCommentAdded { author, body } => {
            if author.trim().is_empty() {
                return Err(StoreError::InvalidInput("comment author must not be empty"));
            }
            if body.trim().is_empty() {
                return Err(StoreError::InvalidInput("comment body must not be empty"));
            }
        }
        CellEvent::CellCreated { .. }
        | CellEvent::CellClosed { .. }
        | CellEvent::CellDependencyRemoved { .. }
        | CellEvent::SwarmCheckpointed { .. }
        | CellEvent::SwarmRecovered { .. }
        | CellEvent::SubtaskOutcome(_) => {}
    }
    Ok(())
}

/// Folds one stored event into the derived tables. One handler per variant.
pub(in crate::store) fn update_projections_tx(
    conn: &Connection,
    stored: &StoredEvent,
) -> Result<(), StoreError> {
    let project = stored.project.as_str();
    let cell_id = stored.cell_id.as_str();
    let ts_ms = stored.ts_ms;

    match &stored.event {
        CellEvent::CellCreated {
            title,
            description,
            cell_type,
            priority,
            parent_id,
            created_at_ms,
        } => {
            conn.execute(
                r#"
                INSERT INTO cells(
                  project, id, title, description, cell_type, status, priority, parent_id,
                  assignee, created_at_ms, updated_at_ms, closed_at_ms, closed_reason, last_seq
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, NULL, NULL, ?11)
                "#,
                params![
                    project,
                    cell_id,
                    title.trim(),
                    description,
                    cell_type.as_str(),
                    CellStatus::Open.as_str(),
                    priority,
                    parent_id,
                    created_at_ms.unwrap_or(ts_ms),
                    ts_ms,
                    stored.seq
                ],
            )?;
        }
        CellEvent::CellUpdated { changes } => {
            let current = require_cell_tx(conn, project, cell_id)?;
            for change in changes {
                apply_field_change_tx(conn, project, &current, change)?;
            }
        }
        CellEvent::CellStatusChanged { to, reason, .. } => {
            if *to == CellStatus::Closed {
                close_row_tx(conn, project, cell_id, ts_ms, reason.as_deref())?;
            } else {
                conn.execute(
                    "UPDATE cells SET status=?3 WHERE project=?1 AND id=?2",
                    params![project, cell_id, to.as_str()],
                )?;
            }
        }
        CellEvent::CellClosed { reason } => {
            close_row_tx(conn, project, cell_id, ts_ms, Some(reason.as_str()))?;
        }
        CellEvent::CellDependencyAdded {
            depends_on,
            relationship,
        } => {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO dependencies(project, from_id, to_id, relationship, created_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![project, cell_id, depends_on, relationship.as_str(), ts_ms],
            )?;
        }
        CellEvent::CellDependencyRemoved {
            depends_on,
            relationship,
        } => {
            conn.execute(
                "DELETE FROM dependencies WHERE project=?1 AND from_id=?2 AND to_id=?3 AND relationship=?4",
                params![project, cell_id, depends_on, relationship.as_str()],
            )?;
        }
        CellEvent::CellLabelAdded { label } => {
            conn.execute(
                "INSERT OR IGNORE INTO labels(project, cell_id, label, seq) VALUES (?1, ?2, ?3, ?4)",
                params![project, cell_id, label.trim(), stored.seq],
            )?;
        }
        CellEvent::CellLabelRemoved { label } => {
            conn.execute(
                "DELETE FROM labels WHERE project=?1 AND cell_id=?2 AND label=?3",
                params![project, cell_id, label.trim()],
            )?;
        }
        CellEvent::CellCommentAdded { author, body } => {
            conn.execute(
                r#"
                INSERT INTO comments(project, cell_id, seq, author, body, ts_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![project, cell_id, stored.seq, author.trim(), body, ts_ms],
            )?;
        }
        CellEvent::SwarmCheckpointed { .. }
        | CellEvent::SwarmRecovered { .. }
        | CellEvent::SubtaskOutcome(_) => return Ok(()),
    }

    touch_cell_tx(conn, project, cell_id, ts_ms, stored.seq)?;
    mark_dirty_tx(conn, project, cell_id, ts_ms, stored.seq)?;
    Ok(())
}

fn close_row_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    ts_ms: i64,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        UPDATE cells SET status=?3, closed_at_ms=?4, closed_reason=?5
        WHERE project=?1 AND id=?2
        "#,
        params![project, cell_id, CellStatus::Closed.as_str(), ts_ms, reason],
    )?;
    Ok(())
}

fn apply_field_change_tx(
    conn: &Connection,
    project: &str,
    current: &CellRow,
    change: &FieldChange,
) -> Result<(), StoreError> {
    // Last applied wins. A stale `old` is only worth a trace line.
    let stale = match change {
        FieldChange::Title { old, .. } => *old != current.title,
        FieldChange::Description { old, .. } => *old != current.description,
        FieldChange::Priority { old, .. } => *old != current.priority,
        FieldChange::CellType { old, .. } => *old != current.cell_type,
        FieldChange::Assignee { old, .. } => *old != current.assignee,
        FieldChange::ParentId { old, .. } => *old != current.parent_id,
    };
    if stale {
        tracing::debug!(
            cell_id = %current.id,
            field = change.field_name(),
            "concurrent update overwrote a newer value"
        );
    }

    let (column, value): (&str, Box<dyn ToSql + '_>) = match change {
        FieldChange::Title { new, .. } => ("title", Box::new(new.trim())),
        FieldChange::Description { new, .. } => ("description", Box::new(new.as_deref())),
        FieldChange::Priority { new, .. } => ("priority", Box::new(*new)),
        FieldChange::CellType { new, .. } => ("cell_type", Box::new(new.as_str())),
        FieldChange::Assignee { new, .. } => ("assignee", Box::new(new.as_deref())),
        FieldChange::ParentId { new, .. } => ("parent_id", Box::new(new.as_deref())),
    };
    let sql = format!("UPDATE cells SET {column}=?3 WHERE project=?1 AND id=?2");
    conn.execute(&sql, params![project, current.id, value])?;
    Ok(())
}

fn check_title(title: &str) -> Result<(), StoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::InvalidInput("title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(StoreError::InvalidInput("title too long"));
    }
    Ok(())
}

fn check_label(label: &str) -> Result<(), StoreError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(StoreError::InvalidInput("label must not be empty"));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(StoreError::InvalidInput("label too long"));
    }
    Ok(())
}
