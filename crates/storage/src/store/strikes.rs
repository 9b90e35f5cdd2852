#![forbid(unsafe_code)]

use super::*;
use cm_core::strikes::{StrikeRecord, architecture_review_prompt, is_struck_out};

impl SqliteStore {
    /// Records a failed fix attempt. From the third strike on the status carries an
    /// architecture-review prompt.
    pub fn add_strike(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
        attempt: &str,
        reason: &str,
    ) -> Result<StrikeStatus, StoreError> {
        check_cell_id(cell_id)?;
        let attempt = attempt.trim();
        let reason = reason.trim();
        if attempt.is_empty() {
            return Err(StoreError::InvalidInput("attempt must not be empty"));
        }
        if reason.is_empty() {
            return Err(StoreError::InvalidInput("reason must not be empty"));
        }

        let tx = self.write_tx()?;
        ensure_project_tx(&tx, project.as_str(), now_ms())?;
        tx.execute(
            "INSERT INTO strikes(project, cell_id, attempt, reason, ts_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project.as_str(), cell_id, attempt, reason, now_ms()],
        )?;
        let status = strike_status_tx(&tx, project.as_str(), cell_id)?;
        tx.commit()?;

        if status.is_struck_out {
            tracing::warn!(project = %project, cell_id, count = status.count, "cell struck out");
        } else {
            tracing::info!(project = %project, cell_id, count = status.count, "strike recorded");
        }
        Ok(status)
    }

    pub fn get_strikes(&self, project: &ProjectKey, cell_id: &str) -> Result<StrikeStatus, StoreError> {
        strike_status_tx(&self.conn, project.as_str(), cell_id)
    }

    /// Human-directed reset. Returns how many strikes were dropped.
    pub fn clear_strikes(&mut self, project: &ProjectKey, cell_id: &str) -> Result<usize, StoreError> {
        let tx = self.write_tx()?;
        let cleared = tx.execute(
            "DELETE FROM strikes WHERE project=?1 AND cell_id=?2",
            params![project.as_str(), cell_id],
        )?;
        tx.commit()?;
        if cleared > 0 {
            tracing::info!(project = %project, cell_id, cleared, "strikes cleared");
        }
        Ok(cleared)
    }
}

pub(in crate::store) fn strike_status_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
) -> Result<StrikeStatus, StoreError> {
    let strikes = {
        let mut stmt = conn.prepare(
            "SELECT attempt, reason, ts_ms FROM strikes WHERE project=?1 AND cell_id=?2 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![project, cell_id], |row| {
            Ok(StrikeRecord {
                attempt: row.get(0)?,
                reason: row.get(1)?,
                ts_ms: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let count = u32::try_from(strikes.len()).unwrap_or(u32::MAX);
    let struck_out = is_struck_out(count);
    let architecture_prompt = if struck_out {
        let title = load_cell_tx(conn, project, cell_id)?.map(|cell| cell.title);
        Some(architecture_review_prompt(cell_id, title.as_deref(), &strikes))
    } else {
        None
    };
    Ok(StrikeStatus {
        cell_id: cell_id.to_string(),
        count,
        is_struck_out: struck_out,
        strikes,
        architecture_prompt,
    })
}
