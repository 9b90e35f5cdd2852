#![forbid(unsafe_code)]

use super::*;
use cm_core::model::Importance;
use std::collections::BTreeMap;

const MAX_THREAD_ID_LEN: usize = 200;
const MAX_RECIPIENTS: usize = 64;
const MAX_SUBJECT_LEN: usize = 300;
const MAX_BODY_LEN: usize = 16_000;
const MAX_INBOX_LIMIT: usize = 200;

fn normalize_thread_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("thread_id must not be empty"));
    }
    if raw.len() > MAX_THREAD_ID_LEN {
        return Err(StoreError::InvalidInput("thread_id too long"));
    }

    let normalized = raw.replace('\\', "/");
    let mut parts = Vec::<&str>::new();
    for part in normalized.split('/') {
        let part = part.trim();
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(StoreError::InvalidInput("thread_id must not contain '..'"));
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return Err(StoreError::InvalidInput("thread_id must not be empty"));
    }
    Ok(parts.join("/"))
}

fn normalize_recipients(raw: &[String]) -> Result<Vec<String>, StoreError> {
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("message needs at least one recipient"));
    }
    if raw.len() > MAX_RECIPIENTS {
        return Err(StoreError::InvalidInput("too many recipients"));
    }
    let mut out = Vec::with_capacity(raw.len());
    for agent in raw {
        let agent = normalize_agent(agent, "recipient must not be empty")?;
        if !out.contains(&agent) {
            out.push(agent);
        }
    }
    Ok(out)
}

impl SqliteStore {
    pub fn send_message(
        &mut self,
        project: &ProjectKey,
        request: SendMessageRequest,
    ) -> Result<MessageRow, StoreError> {
        let thread_id = normalize_thread_id(&request.thread_id)?;
        let from = normalize_agent(&request.from, "sender must not be empty")?;
        let to = normalize_recipients(&request.to)?;
        let subject = request.subject.trim().to_string();
        if subject.is_empty() {
            return Err(StoreError::InvalidInput("subject must not be empty"));
        }
        if subject.len() > MAX_SUBJECT_LEN {
            return Err(StoreError::InvalidInput("subject too long"));
        }
        if request.body.len() > MAX_BODY_LEN {
            return Err(StoreError::InvalidInput("body too long"));
        }

        let tx = self.write_tx()?;
        let created_at_ms = now_ms();
        ensure_project_tx(&tx, project.as_str(), created_at_ms)?;
        tx.execute(
            r#"
            INSERT INTO messages(project, thread_id, from_agent, subject, body, importance, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                project.as_str(),
                thread_id,
                from,
                subject,
                request.body,
                request.importance.as_str(),
                created_at_ms
            ],
        )?;
        let seq = tx.last_insert_rowid();
        for agent in &to {
            tx.execute(
                "INSERT INTO message_recipients(project, message_seq, agent, read_at_ms) VALUES (?1, ?2, ?3, NULL)",
                params![project.as_str(), seq, agent],
            )?;
        }
        tx.commit()?;

        tracing::debug!(project = %project, thread_id = %thread_id, seq, recipients = to.len(), "message sent");
        Ok(MessageRow {
            seq,
            thread_id,
            from,
            to,
            subject,
            body: request.body,
            importance: request.importance,
            created_at_ms,
            read_at_ms: None,
        })
    }

    /// Messages addressed to `agent`, oldest first.
    pub fn inbox(
        &self,
        project: &ProjectKey,
        request: InboxRequest,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let agent = normalize_agent(&request.agent, "agent must not be empty")?;
        let limit = if request.limit == 0 {
            MAX_INBOX_LIMIT
        } else {
            request.limit.min(MAX_INBOX_LIMIT)
        };
        let mut stmt = self.conn.prepare(
            r#"
            SELECT m.seq, m.thread_id, m.from_agent, m.subject, m.body, m.importance,
                   m.created_at_ms, r.read_at_ms
            FROM message_recipients r
            JOIN messages m ON m.seq=r.message_seq
            WHERE r.project=?1 AND r.agent=?2 AND (?3=0 OR r.read_at_ms IS NULL)
            ORDER BY m.seq ASC
            LIMIT ?4
            "#,
        )?;
        let mut rows = stmt.query(params![
            project.as_str(),
            agent,
            if request.unread_only { 1i64 } else { 0i64 },
            to_sqlite_limit(limit)
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let importance: String = row.get(5)?;
            out.push(MessageRow {
                seq: row.get(0)?,
                thread_id: row.get(1)?,
                from: row.get(2)?,
                to: Vec::new(),
                subject: row.get(3)?,
                body: row.get(4)?,
                importance: Importance::parse(&importance)
                    .ok_or(StoreError::InvalidInput("unknown message importance"))?,
                created_at_ms: row.get(6)?,
                read_at_ms: row.get(7)?,
            });
        }
        drop(rows);

        let recipients = self.recipients_for(project, out.iter().map(|m| m.seq))?;
        for message in &mut out {
            if let Some(to) = recipients.get(&message.seq) {
                message.to = to.clone();
            }
        }
        Ok(out)
    }

    /// Marks messages read for `agent`. Already read or foreign messages are skipped.
    pub fn ack_messages(
        &mut self,
        project: &ProjectKey,
        agent: &str,
        seqs: &[i64],
    ) -> Result<usize, StoreError> {
        let agent = normalize_agent(agent, "agent must not be empty")?;
        let tx = self.write_tx()?;
        let now = now_ms();
        let mut acked = 0usize;
        for seq in seqs {
            acked += tx.execute(
                r#"
                UPDATE message_recipients SET read_at_ms=?4
                WHERE project=?1 AND agent=?2 AND message_seq=?3 AND read_at_ms IS NULL
                "#,
                params![project.as_str(), agent, seq, now],
            )?;
        }
        tx.commit()?;
        Ok(acked)
    }

    fn recipients_for(
        &self,
        project: &ProjectKey,
        seqs: impl Iterator<Item = i64>,
    ) -> Result<BTreeMap<i64, Vec<String>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT agent FROM message_recipients WHERE project=?1 AND message_seq=?2 ORDER BY rowid ASC",
        )?;
        let mut out = BTreeMap::new();
        for seq in seqs {
            let rows = stmt.query_map(params![project.as_str(), seq], |row| row.get(0))?;
            out.insert(seq, rows.collect::<Result<Vec<String>, _>>()?);
        }
        Ok(out)
    }
}
