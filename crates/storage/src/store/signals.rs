#![forbid(unsafe_code)]

use super::*;

impl SqliteStore {
    /// Registers the completion signal for a task. Re-registering an open signal is a no-op.
    pub fn register_completion_signal(
        &mut self,
        project: &ProjectKey,
        task_id: &str,
    ) -> Result<bool, StoreError> {
        check_cell_id(task_id)?;
        let tx = self.write_tx()?;
        ensure_project_tx(&tx, project.as_str(), now_ms())?;
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO completion_signals(project, task_id, created_at_ms, resolved_at_ms, payload_json)
            VALUES (?1, ?2, ?3, NULL, NULL)
            "#,
            params![project.as_str(), task_id, now_ms()],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    /// Resolves at most once. A missing or already resolved signal is not an error.
    pub fn resolve_completion_signal(
        &mut self,
        project: &ProjectKey,
        task_id: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<SignalResolution, StoreError> {
        let tx = self.write_tx()?;
        let resolution = resolve_signal_tx(&tx, project.as_str(), task_id, payload)?;
        tx.commit()?;
        Ok(resolution)
    }
}

pub(in crate::store) fn resolve_signal_tx(
    conn: &Connection,
    project: &str,
    task_id: &str,
    payload: Option<&serde_json::Value>,
) -> Result<SignalResolution, StoreError> {
    let resolved_at: Option<Option<i64>> = conn
        .query_row(
            "SELECT resolved_at_ms FROM completion_signals WHERE project=?1 AND task_id=?2",
            params![project, task_id],
            |row| row.get(0),
        )
        .optional()?;
    match resolved_at {
        None => Ok(SignalResolution::Absent),
        Some(Some(_)) => Ok(SignalResolution::AlreadyResolved),
        Some(None) => {
            let payload_json = payload.map(serde_json::to_string).transpose()?;
            conn.execute(
                r#"
                UPDATE completion_signals SET resolved_at_ms=?3, payload_json=?4
                WHERE project=?1 AND task_id=?2 AND resolved_at_ms IS NULL
                "#,
                params![project, task_id, now_ms(), payload_json],
            )?;
            Ok(SignalResolution::Resolved)
        }
    }
}
