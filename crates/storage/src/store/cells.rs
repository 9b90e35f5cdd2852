#![forbid(unsafe_code)]

use super::*;
use super::events::append_event_tx;
use cm_core::events::FieldChange;
use cm_core::ids::generated_cell_id;

const CELL_COUNTER: &str = "cell_seq";
const MAX_QUERY_LIMIT: usize = 1000;

impl SqliteStore {
    /// Creates a cell through a `cell_created` event. Without an explicit id one is drawn
    /// from the project counter.
    pub fn create_cell(
        &mut self,
        project: &ProjectKey,
        request: CreateCellRequest,
    ) -> Result<CellRow, StoreError> {
        let tx = self.write_tx()?;
        let cell_id = match request.id.as_deref().map(str::trim) {
            Some(id) => id.to_string(),
            None => loop {
                let seq = next_counter_tx(&tx, project.as_str(), CELL_COUNTER)?;
                let candidate = generated_cell_id(project, seq);
                if !cell_exists_tx(&tx, project.as_str(), &candidate)? {
                    break candidate;
                }
            },
        };
        if let Some(parent_id) = request.parent_id.as_deref() {
            require_cell_tx(&tx, project.as_str(), parent_id)?;
        }

        let event = CellEvent::CellCreated {
            title: request.title,
            description: request.description,
            cell_type: request.cell_type,
            priority: request.priority,
            parent_id: request.parent_id,
            created_at_ms: None,
        };
        append_event_tx(&tx, project.as_str(), &cell_id, &event)?;
        let cell = require_cell_tx(&tx, project.as_str(), &cell_id)?;
        tx.commit()?;

        tracing::info!(project = %project, cell_id = %cell.id, "cell created");
        Ok(cell)
    }

    /// Emits one `cell_updated` carrying only the fields that differ. A patch that changes
    /// nothing writes nothing.
    pub fn update_cell(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        patch: CellPatch,
    ) -> Result<CellRow, StoreError> {
        let tx = self.write_tx()?;
        let current = require_cell_tx(&tx, project.as_str(), cell_id)?;

        let mut changes = Vec::new();
        if let Some(title) = patch.title
            && title.trim() != current.title
        {
            changes.push(FieldChange::Title {
                old: current.title.clone(),
                new: title,
            });
        }
        if let Some(description) = patch.description
            && description != current.description
        {
            changes.push(FieldChange::Description {
                old: current.description.clone(),
                new: description,
            });
        }
        if let Some(priority) = patch.priority
            && priority != current.priority
        {
            changes.push(FieldChange::Priority {
                old: current.priority,
                new: priority,
            });
        }
        if let Some(cell_type) = patch.cell_type
            && cell_type != current.cell_type
        {
            changes.push(FieldChange::CellType {
                old: current.cell_type,
                new: cell_type,
            });
        }
        if let Some(assignee) = patch.assignee
            && assignee != current.assignee
        {
            changes.push(FieldChange::Assignee {
                old: current.assignee.clone(),
                new: assignee,
            });
        }
        if let Some(parent_id) = patch.parent_id
            && parent_id != current.parent_id
        {
            if let Some(parent) = parent_id.as_deref() {
                if parent == cell_id {
                    return Err(StoreError::InvalidInput("a cell cannot be its own parent"));
                }
                require_cell_tx(&tx, project.as_str(), parent)?;
            }
            changes.push(FieldChange::ParentId {
                old: current.parent_id.clone(),
                new: parent_id,
            });
        }

        if changes.is_empty() {
            return Ok(current);
        }
        append_event_tx(
            &tx,
            project.as_str(),
            cell_id,
            &CellEvent::CellUpdated { changes },
        )?;
        let cell = require_cell_tx(&tx, project.as_str(), cell_id)?;
        tx.commit()?;
        Ok(cell)
    }

    /// Moves a cell along the status machine. Setting the current status is a no-op.
    pub fn set_status(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        to: CellStatus,
        reason: Option<String>,
    ) -> Result<CellRow, StoreError> {
        let tx = self.write_tx()?;
        let current = require_cell_tx(&tx, project.as_str(), cell_id)?;
        if current.status == to {
            return Ok(current);
        }
        let event = CellEvent::CellStatusChanged {
            from: current.status,
            to,
            reason,
        };
        append_event_tx(&tx, project.as_str(), cell_id, &event)?;
        let cell = require_cell_tx(&tx, project.as_str(), cell_id)?;
        tx.commit()?;

        tracing::info!(project = %project, cell_id, from = %current.status, to = %to, "cell status changed");
        Ok(cell)
    }

    pub fn tombstone_cell(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        reason: Option<String>,
    ) -> Result<CellRow, StoreError> {
        self.set_status(project, cell_id, CellStatus::Tombstone, reason)
    }

    /// Closes a cell. Closing twice is absorbed: no second event, `already_closed = true`.
    pub fn close_cell(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        reason: &str,
    ) -> Result<CloseResult, StoreError> {
        let tx = self.write_tx()?;
        let appended = append_event_tx(
            &tx,
            project.as_str(),
            cell_id,
            &CellEvent::CellClosed {
                reason: reason.trim().to_string(),
            },
        )?;
        let cell = require_cell_tx(&tx, project.as_str(), cell_id)?;
        tx.commit()?;

        if appended.deduped {
            tracing::debug!(project = %project, cell_id, "close absorbed, cell already closed");
        } else {
            tracing::info!(project = %project, cell_id, "cell closed");
        }
        Ok(CloseResult {
            cell,
            event: appended.event,
            already_closed: appended.deduped,
        })
    }

    /// Adds `from_id -> to_id`. Returns `None` when the edge already exists.
    ///
    /// The blocked cache is not touched; call `rebuild_blocked_cache` afterwards.
    pub fn add_dependency(
        &mut self,
        project: &ProjectKey,
        from_id: &str,
        to_id: &str,
        relationship: DependencyKind,
    ) -> Result<Option<StoredEvent>, StoreError> {
        let tx = self.write_tx()?;
        if edge_exists_tx(&tx, project.as_str(), from_id, to_id, relationship)? {
            require_cell_tx(&tx, project.as_str(), from_id)?;
            return Ok(None);
        }
        let appended = append_event_tx(
            &tx,
            project.as_str(),
            from_id,
            &CellEvent::CellDependencyAdded {
                depends_on: to_id.to_string(),
                relationship,
            },
        )?;
        tx.commit()?;
        Ok(Some(appended.event))
    }

    pub fn remove_dependency(
        &mut self,
        project: &ProjectKey,
        from_id: &str,
        to_id: &str,
        relationship: DependencyKind,
    ) -> Result<Option<StoredEvent>, StoreError> {
        let tx = self.write_tx()?;
        if !edge_exists_tx(&tx, project.as_str(), from_id, to_id, relationship)? {
            return Ok(None);
        }
        let appended = append_event_tx(
            &tx,
            project.as_str(),
            from_id,
            &CellEvent::CellDependencyRemoved {
                depends_on: to_id.to_string(),
                relationship,
            },
        )?;
        tx.commit()?;
        Ok(Some(appended.event))
    }

    pub fn add_label(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        label: &str,
    ) -> Result<Option<StoredEvent>, StoreError> {
        let tx = self.write_tx()?;
        if label_exists_tx(&tx, project.as_str(), cell_id, label.trim())? {
            return Ok(None);
        }
        let appended = append_event_tx(
            &tx,
            project.as_str(),
            cell_id,
            &CellEvent::CellLabelAdded {
                label: label.trim().to_string(),
            },
        )?;
        tx.commit()?;
        Ok(Some(appended.event))
    }

    pub fn remove_label(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        label: &str,
    ) -> Result<Option<StoredEvent>, StoreError> {
        let tx = self.write_tx()?;
        if !label_exists_tx(&tx, project.as_str(), cell_id, label.trim())? {
            return Ok(None);
        }
        let appended = append_event_tx(
            &tx,
            project.as_str(),
            cell_id,
            &CellEvent::CellLabelRemoved {
                label: label.trim().to_string(),
            },
        )?;
        tx.commit()?;
        Ok(Some(appended.event))
    }

    pub fn add_comment(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        author: &str,
        body: &str,
    ) -> Result<StoredEvent, StoreError> {
        let tx = self.write_tx()?;
        let appended = append_event_tx(
            &tx,
            project.as_str(),
            cell_id,
            &CellEvent::CellCommentAdded {
                author: author.trim().to_string(),
                body: body.to_string(),
            },
        )?;
        tx.commit()?;
        Ok(appended.event)
    }

    pub fn get_cell(&self, project: &ProjectKey, cell_id: &str) -> Result<Option<CellRow>, StoreError> {
        load_cell_tx(&self.conn, project.as_str(), cell_id)
    }

    pub fn query_cells(
        &self,
        project: &ProjectKey,
        query: CellQuery,
    ) -> Result<Vec<CellRow>, StoreError> {
        let limit = if query.limit == 0 {
            MAX_QUERY_LIMIT
        } else {
            query.limit.min(MAX_QUERY_LIMIT)
        };
        let sql = format!(
            r#"
            SELECT {CELL_COLUMNS} FROM cells
            WHERE project=?1
              AND (?2 IS NULL OR status=?2)
              AND (?3 IS NULL OR cell_type=?3)
              AND (?4 IS NULL OR parent_id=?4)
            ORDER BY priority DESC, created_at_ms ASC, id ASC
            LIMIT ?5
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                project.as_str(),
                query.status.map(CellStatus::as_str),
                query.cell_type.map(CellType::as_str),
                query.parent_id,
                to_sqlite_limit(limit)
            ],
            read_cell_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Edges leaving `cell_id` (what it depends on).
    pub fn get_dependencies(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<DependencyRow>, StoreError> {
        self.load_edges(
            "SELECT from_id, to_id, relationship, created_at_ms FROM dependencies WHERE project=?1 AND from_id=?2 ORDER BY to_id, relationship",
            project,
            cell_id,
        )
    }

    /// Edges arriving at `cell_id` (what depends on it).
    pub fn get_dependents(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<DependencyRow>, StoreError> {
        self.load_edges(
            "SELECT from_id, to_id, relationship, created_at_ms FROM dependencies WHERE project=?1 AND to_id=?2 ORDER BY from_id, relationship",
            project,
            cell_id,
        )
    }

    fn load_edges(
        &self,
        sql: &str,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<DependencyRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![project.as_str(), cell_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let relationship: String = row.get(2)?;
            out.push(DependencyRow {
                from_id: row.get(0)?,
                to_id: row.get(1)?,
                relationship: DependencyKind::parse(&relationship)
                    .ok_or(StoreError::InvalidInput("unknown dependency relationship"))?,
                created_at_ms: row.get(3)?,
            });
        }
        Ok(out)
    }

    /// Labels in the order they were added.
    pub fn get_labels(&self, project: &ProjectKey, cell_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT label FROM labels WHERE project=?1 AND cell_id=?2 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![project.as_str(), cell_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn get_comments(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<CommentRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, author, body, ts_ms FROM comments WHERE project=?1 AND cell_id=?2 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![project.as_str(), cell_id], |row| {
            Ok(CommentRow {
                seq: row.get(0)?,
                author: row.get(1)?,
                body: row.get(2)?,
                ts_ms: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_dirty_cells(&self, project: &ProjectKey) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT cell_id FROM dirty_cells WHERE project=?1 ORDER BY cell_id ASC")?;
        let rows = stmt.query_map(params![project.as_str()], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// Dirty marks with the event `seq` that last set each one, ordered by cell id.
    pub fn dirty_marks(&self, project: &ProjectKey) -> Result<Vec<DirtyMark>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT cell_id, mark_seq FROM dirty_cells WHERE project=?1 ORDER BY cell_id ASC",
        )?;
        let rows = stmt.query_map(params![project.as_str()], |row| {
            Ok(DirtyMark {
                cell_id: row.get(0)?,
                mark_seq: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Clears the given marks unless the cell was marked again after the snapshot was
    /// taken. Returns how many marks were removed.
    pub fn clear_dirty_marks(
        &mut self,
        project: &ProjectKey,
        marks: &[DirtyMark],
    ) -> Result<usize, StoreError> {
        let tx = self.write_tx()?;
        let mut cleared = 0usize;
        for mark in marks {
            cleared += tx.execute(
                "DELETE FROM dirty_cells WHERE project=?1 AND cell_id=?2 AND mark_seq<=?3",
                params![project.as_str(), mark.cell_id, mark.mark_seq],
            )?;
        }
        tx.commit()?;
        Ok(cleared)
    }

    /// Returns whether a mark was removed; clearing a clean cell is fine.
    pub fn clear_dirty(&mut self, project: &ProjectKey, cell_id: &str) -> Result<bool, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM dirty_cells WHERE project=?1 AND cell_id=?2",
            params![project.as_str(), cell_id],
        )?;
        Ok(removed > 0)
    }

    pub fn epic_progress(
        &self,
        project: &ProjectKey,
        epic_id: &str,
    ) -> Result<EpicProgress, StoreError> {
        if load_cell_tx(&self.conn, project.as_str(), epic_id)?.is_none() {
            return Err(StoreError::UnknownCell {
                cell_id: epic_id.to_string(),
            });
        }
        let mut progress = EpicProgress {
            epic_id: epic_id.to_string(),
            ..EpicProgress::default()
        };
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM cells WHERE project=?1 AND parent_id=?2 GROUP BY status",
        )?;
        let mut rows = stmt.query(params![project.as_str(), epic_id])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count = row.get::<_, i64>(1)? as usize;
            progress.total += count;
            match CellStatus::parse(&status) {
                Some(CellStatus::Open) => progress.open += count,
                Some(CellStatus::InProgress) => progress.in_progress += count,
                Some(CellStatus::Blocked) => progress.blocked += count,
                Some(CellStatus::Closed) => progress.closed += count,
                Some(CellStatus::Tombstone) => progress.tombstone += count,
                None => return Err(StoreError::InvalidInput("unknown cell status")),
            }
        }
        Ok(progress)
    }
}

fn edge_exists_tx(
    conn: &Connection,
    project: &str,
    from_id: &str,
    to_id: &str,
    relationship: DependencyKind,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM dependencies WHERE project=?1 AND from_id=?2 AND to_id=?3 AND relationship=?4",
            params![project, from_id, to_id, relationship.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn label_exists_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    label: &str,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM labels WHERE project=?1 AND cell_id=?2 AND label=?3",
            params![project, cell_id, label],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}
