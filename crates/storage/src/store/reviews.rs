#![forbid(unsafe_code)]

use super::*;

const MAX_FEEDBACK_LEN: usize = 4000;

impl SqliteStore {
    pub fn record_review(
        &mut self,
        project: &ProjectKey,
        request: ReviewRequest,
    ) -> Result<ReviewRow, StoreError> {
        let reviewer = normalize_agent(&request.reviewer, "reviewer must not be empty")?;
        let feedback = request
            .feedback
            .map(|feedback| feedback.trim().to_string())
            .filter(|feedback| !feedback.is_empty());
        if feedback.as_ref().is_some_and(|f| f.len() > MAX_FEEDBACK_LEN) {
            return Err(StoreError::InvalidInput("feedback too long"));
        }

        let tx = self.write_tx()?;
        require_cell_tx(&tx, project.as_str(), &request.cell_id)?;
        let ts_ms = now_ms();
        tx.execute(
            r#"
            INSERT INTO reviews(project, cell_id, reviewer, verdict, feedback, ts_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                project.as_str(),
                request.cell_id,
                reviewer,
                request.verdict.as_str(),
                feedback,
                ts_ms
            ],
        )?;
        let seq = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(
            project = %project,
            cell_id = %request.cell_id,
            verdict = request.verdict.as_str(),
            "review recorded"
        );
        Ok(ReviewRow {
            seq,
            cell_id: request.cell_id,
            reviewer,
            verdict: request.verdict,
            feedback,
            ts_ms,
        })
    }

    pub fn latest_review(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Option<ReviewRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, cell_id, reviewer, verdict, feedback, ts_ms
            FROM reviews WHERE project=?1 AND cell_id=?2
            ORDER BY seq DESC LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query(params![project.as_str(), cell_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let verdict: String = row.get(3)?;
        Ok(Some(ReviewRow {
            seq: row.get(0)?,
            cell_id: row.get(1)?,
            reviewer: row.get(2)?,
            verdict: ReviewVerdict::parse(&verdict)
                .ok_or(StoreError::InvalidInput("unknown review verdict"))?,
            feedback: row.get(4)?,
            ts_ms: row.get(5)?,
        }))
    }

    /// Latest verdict plus the number of rejections so far.
    pub fn review_summary(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<ReviewSummary, StoreError> {
        let latest = self.latest_review(project, cell_id)?;
        let rejections: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reviews WHERE project=?1 AND cell_id=?2 AND verdict=?3",
            params![project.as_str(), cell_id, ReviewVerdict::Rejected.as_str()],
            |row| row.get(0),
        )?;
        Ok(ReviewSummary {
            latest,
            rejections: u32::try_from(rejections).unwrap_or(u32::MAX),
        })
    }
}
