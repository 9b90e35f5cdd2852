#![forbid(unsafe_code)]

use super::*;
use super::deps::rebuild_all_blocked_cache_tx;
use super::projections::{update_projections_tx, validate_event_tx};
use std::collections::VecDeque;

const EVENT_PAGE_SIZE: i64 = 256;

impl SqliteStore {
    /// Appends one event and applies its projection in the same transaction.
    ///
    /// Closing an already closed cell writes nothing and returns the original close event
    /// with `deduped = true`.
    pub fn append_event(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        event: CellEvent,
    ) -> Result<Appended, StoreError> {
        let tx = self.write_tx()?;
        let appended = append_event_tx(&tx, project.as_str(), cell_id, &event)?;
        tx.commit()?;
        if !appended.deduped {
            tracing::debug!(
                project = %project,
                cell_id,
                seq = appended.event.seq,
                event_type = appended.event.event_type(),
                "event appended"
            );
        }
        Ok(appended)
    }

    /// Lazy, ordered read of the log. Restart by passing the last seen `seq` as `after_seq`.
    pub fn read_events<'a>(&'a self, project: &ProjectKey, filter: EventFilter) -> EventCursor<'a> {
        EventCursor::new(&self.conn, project.as_str(), filter)
    }

    pub fn events_for_cell(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.read_events(
            project,
            EventFilter {
                cell_id: Some(cell_id.to_string()),
                ..EventFilter::default()
            },
        )
        .collect()
    }

    pub fn last_event_seq(&self, project: &ProjectKey) -> Result<Option<i64>, StoreError> {
        Ok(self.conn.query_row(
            "SELECT MAX(seq) FROM events WHERE project=?1",
            params![project.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Drops every derived table for the project and refolds the whole log.
    pub fn rebuild_projections(&mut self, project: &ProjectKey) -> Result<usize, StoreError> {
        let project_str = project.as_str();
        let tx = self.write_tx()?;
        for table in ["cells", "dependencies", "labels", "comments", "blocked_cache"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE project=?1"),
                params![project_str],
            )?;
        }

        let events = EventCursor::new(&tx, project_str, EventFilter::default())
            .collect::<Result<Vec<_>, _>>()?;
        for stored in &events {
            validate_event_tx(&tx, project_str, &stored.cell_id, &stored.event)?;
            update_projections_tx(&tx, stored)?;
        }
        rebuild_all_blocked_cache_tx(&tx, project_str, now_ms())?;
        tx.commit()?;

        tracing::info!(project = %project, replayed = events.len(), "projections rebuilt");
        Ok(events.len())
    }
}

pub(in crate::store) fn append_event_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    event: &CellEvent,
) -> Result<Appended, StoreError> {
    if matches!(event, CellEvent::CellClosed { .. }) {
        if let Some(original) = prior_close_tx(conn, project, cell_id)? {
            return Ok(Appended {
                event: original,
                deduped: true,
            });
        }
    }

    validate_event_tx(conn, project, cell_id, event)?;
    let stored = insert_event_tx(conn, project, cell_id, event)?;
    update_projections_tx(conn, &stored)?;
    Ok(Appended {
        event: stored,
        deduped: false,
    })
}

/// The event that closed the cell, if it is closed.
fn prior_close_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
) -> Result<Option<StoredEvent>, StoreError> {
    let Some(cell) = load_cell_tx(conn, project, cell_id)? else {
        return Ok(None);
    };
    if cell.status != CellStatus::Closed {
        return Ok(None);
    }
    if let Some(event) = last_event_tx(conn, project, cell_id, "cell_closed")? {
        return Ok(Some(event));
    }
    // Closed through `cell_status_changed`; audit events may follow it.
    last_event_tx(conn, project, cell_id, "cell_status_changed")
}

/// Pages through the event table in `seq` order.
pub struct EventCursor<'a> {
    conn: &'a Connection,
    project: String,
    filter: EventFilter,
    after_seq: i64,
    position: i64,
    remaining: Option<usize>,
    buffer: VecDeque<StoredEvent>,
    exhausted: bool,
}

impl<'a> EventCursor<'a> {
    fn new(conn: &'a Connection, project: &str, filter: EventFilter) -> Self {
        Self {
            conn,
            project: project.to_string(),
            after_seq: filter.after_seq.unwrap_or(0),
            position: filter.after_seq.unwrap_or(0),
            remaining: filter.limit,
            filter,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// `seq` of the last event handed out (or the starting bound).
    pub fn position(&self) -> i64 {
        self.position
    }

    fn fetch_page(&mut self) -> Result<(), StoreError> {
        let page = match self.filter.cell_id.as_deref() {
            Some(cell_id) => {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE project=?1 AND cell_id=?2 AND seq>?3 ORDER BY seq ASC LIMIT ?4"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![self.project, cell_id, self.after_seq, EVENT_PAGE_SIZE],
                    read_event_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE project=?1 AND seq>?2 ORDER BY seq ASC LIMIT ?3"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![self.project, self.after_seq, EVENT_PAGE_SIZE],
                    read_event_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        if (page.len() as i64) < EVENT_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after_seq = last.seq;
        }
        let types = &self.filter.event_types;
        self.buffer.extend(
            page.into_iter()
                .filter(|stored| types.is_empty() || types.iter().any(|t| t == stored.event_type())),
        );
        Ok(())
    }
}

impl Iterator for EventCursor<'_> {
    type Item = Result<StoredEvent, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let next = self.buffer.pop_front()?;
        self.position = next.seq;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(Ok(next))
    }
}
