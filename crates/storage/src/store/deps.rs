#![forbid(unsafe_code)]

use super::*;
use std::collections::BTreeMap;

// A blocker counts while its status is neither closed nor tombstone. Only direct edges are
// considered: A blocks B blocks C leaves C blocked by B alone.
const UNRESOLVED_BLOCKERS_SQL: &str = r#"
    SELECT d.to_id
    FROM dependencies d
    JOIN cells c ON c.project=d.project AND c.id=d.to_id
    WHERE d.project=?1 AND d.from_id=?2 AND d.relationship='blocks'
      AND c.status NOT IN ('closed', 'tombstone')
    ORDER BY d.to_id ASC
"#;

impl SqliteStore {
    /// Recomputes the cached blockers of one cell and returns them.
    pub fn rebuild_blocked_cache(
        &mut self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let tx = self.write_tx()?;
        require_cell_tx(&tx, project.as_str(), cell_id)?;
        let blockers = rebuild_blocked_cache_tx(&tx, project.as_str(), cell_id, now_ms())?;
        tx.commit()?;
        Ok(blockers)
    }

    /// Recomputes the cache for every cell; returns how many cells ended up blocked.
    pub fn rebuild_all_blocked_cache(&mut self, project: &ProjectKey) -> Result<usize, StoreError> {
        let tx = self.write_tx()?;
        let blocked = rebuild_all_blocked_cache_tx(&tx, project.as_str(), now_ms())?;
        tx.commit()?;
        tracing::debug!(project = %project, blocked, "blocked cache rebuilt");
        Ok(blocked)
    }

    /// Refreshes every cell that has a `blocks` edge onto `blocker_id`. Returns the refreshed ids.
    pub fn rebuild_dependents_blocked_cache(
        &mut self,
        project: &ProjectKey,
        blocker_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let tx = self.write_tx()?;
        let dependents = {
            let mut stmt = tx.prepare(
                r#"
                SELECT DISTINCT from_id FROM dependencies
                WHERE project=?1 AND to_id=?2 AND relationship='blocks'
                ORDER BY from_id ASC
                "#,
            )?;
            let rows = stmt.query_map(params![project.as_str(), blocker_id], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        };
        let now = now_ms();
        for dependent in &dependents {
            rebuild_blocked_cache_tx(&tx, project.as_str(), dependent, now)?;
        }
        tx.commit()?;
        Ok(dependents)
    }

    pub fn is_blocked(&self, project: &ProjectKey, cell_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM blocked_cache WHERE project=?1 AND cell_id=?2 LIMIT 1",
                params![project.as_str(), cell_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn get_blockers(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT blocker_id FROM blocked_cache WHERE project=?1 AND cell_id=?2 ORDER BY blocker_id ASC",
        )?;
        let rows = stmt.query_map(params![project.as_str(), cell_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn get_blocked_cells(&self, project: &ProjectKey) -> Result<Vec<BlockedCell>, StoreError> {
        let mut blockers = BTreeMap::<String, Vec<String>>::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT cell_id, blocker_id FROM blocked_cache WHERE project=?1 ORDER BY cell_id, blocker_id",
            )?;
            let mut rows = stmt.query(params![project.as_str()])?;
            while let Some(row) = rows.next()? {
                let cell_id: String = row.get(0)?;
                let blocker_id: String = row.get(1)?;
                blockers.entry(cell_id).or_default().push(blocker_id);
            }
        }

        let mut out = Vec::with_capacity(blockers.len());
        for (cell_id, blockers) in blockers {
            // Cache rows can outlive a cell only across a rebuild; skip them.
            if let Some(cell) = load_cell_tx(&self.conn, project.as_str(), &cell_id)? {
                out.push(BlockedCell { cell, blockers });
            }
        }
        Ok(out)
    }

    /// Highest priority open cell with no cached blockers; oldest first on ties.
    pub fn get_next_ready_cell(&self, project: &ProjectKey) -> Result<Option<CellRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CELL_COLUMNS} FROM cells
            WHERE project=?1 AND status=?2
              AND NOT EXISTS (
                SELECT 1 FROM blocked_cache b WHERE b.project=cells.project AND b.cell_id=cells.id
              )
            ORDER BY priority DESC, created_at_ms ASC, id ASC
            LIMIT 1
            "#
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                params![project.as_str(), CellStatus::Open.as_str()],
                read_cell_row,
            )
            .optional()?)
    }
}

pub(in crate::store) fn rebuild_blocked_cache_tx(
    conn: &Connection,
    project: &str,
    cell_id: &str,
    now_ms: i64,
) -> Result<Vec<String>, StoreError> {
    conn.execute(
        "DELETE FROM blocked_cache WHERE project=?1 AND cell_id=?2",
        params![project, cell_id],
    )?;
    let blockers = {
        let mut stmt = conn.prepare(UNRESOLVED_BLOCKERS_SQL)?;
        let rows = stmt.query_map(params![project, cell_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()?
    };
    for blocker in &blockers {
        conn.execute(
            r#"
            INSERT INTO blocked_cache(project, cell_id, blocker_id, rebuilt_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![project, cell_id, blocker, now_ms],
        )?;
    }
    Ok(blockers)
}

pub(in crate::store) fn rebuild_all_blocked_cache_tx(
    conn: &Connection,
    project: &str,
    now_ms: i64,
) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM blocked_cache WHERE project=?1",
        params![project],
    )?;
    conn.execute(
        r#"
        INSERT INTO blocked_cache(project, cell_id, blocker_id, rebuilt_at_ms)
        SELECT d.project, d.from_id, d.to_id, ?2
        FROM dependencies d
        JOIN cells c ON c.project=d.project AND c.id=d.to_id
        JOIN cells f ON f.project=d.project AND f.id=d.from_id
        WHERE d.project=?1 AND d.relationship='blocks'
          AND c.status NOT IN ('closed', 'tombstone')
        "#,
        params![project, now_ms],
    )?;
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT cell_id) FROM blocked_cache WHERE project=?1",
        params![project],
        |row| row.get::<_, i64>(0),
    )? as usize)
}
