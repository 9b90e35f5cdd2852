#![forbid(unsafe_code)]

use super::*;
use super::events::append_event_tx;
use cm_core::checkpoint::{Directives, RecoveryMeta, crossed_milestone, validate_progress};
use rusqlite::Row;

const CONTEXT_COLUMNS: &str = "epic_id, cell_id, agent, files_modified_json, progress_percent, directives_json, recovery_json, created_at_ms, updated_at_ms";

impl SqliteStore {
    /// Overwrites the snapshot for `(epic, cell)` and logs a `swarm_checkpointed` audit event.
    pub fn checkpoint(
        &mut self,
        project: &ProjectKey,
        request: CheckpointRequest,
    ) -> Result<SwarmContextRow, StoreError> {
        let progress_percent =
            validate_progress(request.progress_percent).map_err(StoreError::InvalidInput)?;
        let epic_id = request.epic_id.trim().to_string();
        if epic_id.is_empty() {
            return Err(StoreError::InvalidInput("epic_id must not be empty"));
        }
        check_cell_id(&request.cell_id)?;
        let agent = request
            .agent
            .as_deref()
            .map(|agent| normalize_agent(agent, "agent must not be empty"))
            .transpose()?;

        let tx = self.write_tx()?;
        let now = now_ms();
        let previous = load_context_tx(&tx, project.as_str(), &epic_id, &request.cell_id)?;
        let milestone = crossed_milestone(
            previous.as_ref().map(|prev| prev.progress_percent),
            progress_percent,
        )
        .or_else(|| previous.as_ref().and_then(|prev| prev.recovery.milestone));
        let recovery = RecoveryMeta {
            last_checkpoint_ms: now,
            error_context: request.error_context.filter(|ctx| !ctx.trim().is_empty()),
            milestone,
        };
        let created_at_ms = previous.as_ref().map_or(now, |prev| prev.created_at_ms);

        tx.execute(
            r#"
            INSERT INTO swarm_contexts(
              project, epic_id, cell_id, agent, files_modified_json, progress_percent,
              directives_json, recovery_json, created_at_ms, updated_at_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(project, epic_id, cell_id) DO UPDATE SET
              agent=excluded.agent,
              files_modified_json=excluded.files_modified_json,
              progress_percent=excluded.progress_percent,
              directives_json=excluded.directives_json,
              recovery_json=excluded.recovery_json,
              updated_at_ms=excluded.updated_at_ms
            "#,
            params![
                project.as_str(),
                epic_id,
                request.cell_id,
                agent,
                encode_string_list(&request.files_modified)?,
                progress_percent as i64,
                serde_json::to_string(&request.directives)?,
                serde_json::to_string(&recovery)?,
                created_at_ms,
                now
            ],
        )?;
        append_event_tx(
            &tx,
            project.as_str(),
            &request.cell_id,
            &CellEvent::SwarmCheckpointed {
                epic_id: epic_id.clone(),
                agent: agent.clone(),
                progress_percent,
                files_modified: request.files_modified.clone(),
            },
        )?;
        tx.commit()?;

        tracing::debug!(
            project = %project,
            epic_id = %epic_id,
            cell_id = %request.cell_id,
            progress_percent,
            "checkpoint stored"
        );
        Ok(SwarmContextRow {
            epic_id,
            cell_id: request.cell_id,
            agent,
            files_modified: request.files_modified,
            progress_percent,
            directives: request.directives,
            recovery,
            created_at_ms,
            updated_at_ms: now,
        })
    }

    pub fn get_checkpoint(
        &self,
        project: &ProjectKey,
        epic_id: &str,
        cell_id: &str,
    ) -> Result<Option<SwarmContextRow>, StoreError> {
        load_context_tx(&self.conn, project.as_str(), epic_id, cell_id)
    }

    /// Every snapshot of an epic, most recently updated first.
    pub fn list_checkpoints(
        &self,
        project: &ProjectKey,
        epic_id: &str,
    ) -> Result<Vec<SwarmContextRow>, StoreError> {
        let sql = format!(
            "SELECT {CONTEXT_COLUMNS} FROM swarm_contexts WHERE project=?1 AND epic_id=?2 ORDER BY updated_at_ms DESC, cell_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![project.as_str(), epic_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_context_row(row)?);
        }
        Ok(out)
    }

    /// Most recent snapshot for the epic. A miss is `Recovery::NotFound`, not an error.
    pub fn recover(&mut self, project: &ProjectKey, epic_id: &str) -> Result<Recovery, StoreError> {
        let epic_id = epic_id.trim();
        if epic_id.is_empty() {
            return Err(StoreError::InvalidInput("epic_id must not be empty"));
        }
        let tx = self.write_tx()?;
        let sql = format!(
            "SELECT {CONTEXT_COLUMNS} FROM swarm_contexts WHERE project=?1 AND epic_id=?2 ORDER BY updated_at_ms DESC, cell_id ASC LIMIT 1"
        );
        let context = {
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query(params![project.as_str(), epic_id])?;
            match rows.next()? {
                Some(row) => Some(read_context_row(row)?),
                None => None,
            }
        };
        let Some(context) = context else {
            return Ok(Recovery::NotFound);
        };

        let age_seconds = (now_ms() - context.updated_at_ms).max(0) / 1000;
        append_event_tx(
            &tx,
            project.as_str(),
            &context.cell_id,
            &CellEvent::SwarmRecovered {
                epic_id: epic_id.to_string(),
                age_seconds,
            },
        )?;
        tx.commit()?;

        tracing::info!(
            project = %project,
            epic_id,
            cell_id = %context.cell_id,
            age_seconds,
            "swarm context recovered"
        );
        Ok(Recovery::Found {
            context,
            age_seconds,
        })
    }
}

fn load_context_tx(
    conn: &Connection,
    project: &str,
    epic_id: &str,
    cell_id: &str,
) -> Result<Option<SwarmContextRow>, StoreError> {
    let sql = format!(
        "SELECT {CONTEXT_COLUMNS} FROM swarm_contexts WHERE project=?1 AND epic_id=?2 AND cell_id=?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![project, epic_id, cell_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_context_row(row)?)),
        None => Ok(None),
    }
}

fn read_context_row(row: &Row<'_>) -> Result<SwarmContextRow, StoreError> {
    let files_json: String = row.get(3)?;
    let progress: i64 = row.get(4)?;
    let directives_json: String = row.get(5)?;
    let recovery_json: String = row.get(6)?;
    Ok(SwarmContextRow {
        epic_id: row.get(0)?,
        cell_id: row.get(1)?,
        agent: row.get(2)?,
        files_modified: decode_string_list(&files_json)?,
        progress_percent: u8::try_from(progress)
            .map_err(|_| StoreError::InvalidInput("stored progress out of range"))?,
        directives: serde_json::from_str::<Directives>(&directives_json)?,
        recovery: serde_json::from_str::<RecoveryMeta>(&recovery_json)?,
        created_at_ms: row.get(7)?,
        updated_at_ms: row.get(8)?,
    })
}
