#![forbid(unsafe_code)]

use super::*;
use cm_core::glob::{normalize_path, paths_overlap};

const MAX_PATHS_PER_CALL: usize = 256;
const MAX_PATH_LEN: usize = 1024;
const MAX_REASON_LEN: usize = 400;

impl SqliteStore {
    /// All-or-nothing file reservation.
    ///
    /// The conflict check and the inserts share one `BEGIN IMMEDIATE` transaction, so of two
    /// racing callers on the same path exactly one succeeds. Expired rows are pruned first.
    pub fn reserve(
        &mut self,
        project: &ProjectKey,
        request: ReserveRequest,
    ) -> Result<ReservationGrant, StoreError> {
        let agent = normalize_agent(&request.agent, "agent must not be empty")?;
        let paths = normalize_paths(&request.paths)?;
        let reason = normalize_reason(request.reason)?;
        if let Some(ttl_ms) = request.ttl_ms
            && ttl_ms <= 0
        {
            return Err(StoreError::InvalidInput("ttl_ms must be positive"));
        }

        let tx = self.write_tx()?;
        let now = now_ms();
        prune_expired_tx(&tx, project.as_str(), now)?;

        let held = list_reservations_tx(&tx, project.as_str())?;
        let mut conflicts = Vec::new();
        for path in &paths {
            for existing in held.iter().filter(|row| row.agent != agent) {
                let contended = existing.exclusive || request.exclusive;
                if contended && paths_overlap(path, &existing.path) {
                    conflicts.push(ReservationConflict {
                        requested_path: path.clone(),
                        held_path: existing.path.clone(),
                        holder: existing.agent.clone(),
                        reason: existing.reason.clone(),
                    });
                }
            }
        }
        if !conflicts.is_empty() {
            tracing::info!(
                project = %project,
                agent = %agent,
                conflicts = conflicts.len(),
                "reservation refused"
            );
            return Err(StoreError::ReservationConflict { agent, conflicts });
        }

        let expires_at_ms = request.ttl_ms.map(|ttl| now.saturating_add(ttl));
        let mut granted = Vec::with_capacity(paths.len());
        for path in paths {
            tx.execute(
                r#"
                INSERT INTO reservations(project, path, agent, exclusive, reason, created_at_ms, expires_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(project, path, agent) DO UPDATE SET
                  exclusive=excluded.exclusive,
                  reason=excluded.reason,
                  created_at_ms=excluded.created_at_ms,
                  expires_at_ms=excluded.expires_at_ms
                "#,
                params![
                    project.as_str(),
                    path,
                    agent,
                    if request.exclusive { 1i64 } else { 0i64 },
                    reason,
                    now,
                    expires_at_ms
                ],
            )?;
            granted.push(ReservationRow {
                path,
                agent: agent.clone(),
                exclusive: request.exclusive,
                reason: reason.clone(),
                created_at_ms: now,
                expires_at_ms,
            });
        }
        tx.commit()?;

        tracing::debug!(project = %project, agent = %agent, paths = granted.len(), "reservation granted");
        Ok(ReservationGrant { granted })
    }

    /// Drops every reservation held by `agent`. Returns how many were released.
    pub fn release(&mut self, project: &ProjectKey, agent: &str) -> Result<usize, StoreError> {
        let agent = normalize_agent(agent, "agent must not be empty")?;
        let tx = self.write_tx()?;
        let released = release_agent_tx(&tx, project.as_str(), &agent)?;
        tx.commit()?;
        if released > 0 {
            tracing::debug!(project = %project, agent = %agent, released, "reservations released");
        }
        Ok(released)
    }

    pub fn release_paths(
        &mut self,
        project: &ProjectKey,
        agent: &str,
        paths: &[String],
    ) -> Result<usize, StoreError> {
        let agent = normalize_agent(agent, "agent must not be empty")?;
        let paths = normalize_paths(paths)?;
        let tx = self.write_tx()?;
        let mut released = 0usize;
        for path in &paths {
            released += tx.execute(
                "DELETE FROM reservations WHERE project=?1 AND agent=?2 AND path=?3",
                params![project.as_str(), agent, path],
            )?;
        }
        tx.commit()?;
        Ok(released)
    }

    /// Current, unexpired holdings ordered by path then agent.
    pub fn list_reservations(&self, project: &ProjectKey) -> Result<Vec<ReservationRow>, StoreError> {
        let now = now_ms();
        Ok(list_reservations_tx(&self.conn, project.as_str())?
            .into_iter()
            .filter(|row| row.expires_at_ms.is_none_or(|expires| expires > now))
            .collect())
    }
}

pub(in crate::store) fn release_agent_tx(
    conn: &Connection,
    project: &str,
    agent: &str,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM reservations WHERE project=?1 AND agent=?2",
        params![project, agent],
    )?)
}

fn prune_expired_tx(conn: &Connection, project: &str, now_ms: i64) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM reservations WHERE project=?1 AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?2",
        params![project, now_ms],
    )?)
}

fn list_reservations_tx(conn: &Connection, project: &str) -> Result<Vec<ReservationRow>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT path, agent, exclusive, reason, created_at_ms, expires_at_ms
        FROM reservations
        WHERE project=?1
        ORDER BY path ASC, agent ASC
        "#,
    )?;
    let rows = stmt.query_map(params![project], |row| {
        Ok(ReservationRow {
            path: row.get(0)?,
            agent: row.get(1)?,
            exclusive: row.get::<_, i64>(2)? != 0,
            reason: row.get(3)?,
            created_at_ms: row.get(4)?,
            expires_at_ms: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn normalize_paths(raw: &[String]) -> Result<Vec<String>, StoreError> {
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("paths must not be empty"));
    }
    if raw.len() > MAX_PATHS_PER_CALL {
        return Err(StoreError::InvalidInput("too many paths"));
    }
    let mut out = Vec::with_capacity(raw.len());
    for path in raw {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(StoreError::InvalidInput("path must not be empty"));
        }
        if path.len() > MAX_PATH_LEN {
            return Err(StoreError::InvalidInput("path too long"));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(StoreError::InvalidInput("path must not contain '..'"));
        }
        if !out.contains(&path) {
            out.push(path);
        }
    }
    Ok(out)
}

fn normalize_reason(raw: Option<String>) -> Result<Option<String>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.len() > MAX_REASON_LEN {
        return Err(StoreError::InvalidInput("reason too long"));
    }
    Ok(Some(raw.to_string()))
}
