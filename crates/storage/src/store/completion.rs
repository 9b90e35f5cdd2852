#![forbid(unsafe_code)]

use super::*;
use super::events::append_event_tx;
use super::reservations::release_agent_tx;
use super::signals::resolve_signal_tx;

impl SqliteStore {
    /// Closes a finished task together with everything hanging off the close: the agent's
    /// reservations, the completion signal and the `subtask_outcome` audit event. One
    /// transaction; a failure anywhere leaves the cell as it was.
    ///
    /// An already closed cell is reported with `already_closed = true` and left untouched.
    pub fn close_task(
        &mut self,
        project: &ProjectKey,
        request: CloseTaskRequest,
    ) -> Result<ClosedTask, StoreError> {
        check_cell_id(&request.cell_id)?;
        let agent = normalize_agent(&request.agent, "agent must not be empty")?;
        let cell_id = request.cell_id;
        let mut outcome = request.outcome;
        outcome.agent = agent.clone();

        let tx = self.write_tx()?;
        let closed = append_event_tx(
            &tx,
            project.as_str(),
            &cell_id,
            &CellEvent::CellClosed {
                reason: request.reason.trim().to_string(),
            },
        )?;
        if closed.deduped {
            let cell = require_cell_tx(&tx, project.as_str(), &cell_id)?;
            tracing::debug!(project = %project, cell_id = %cell_id, "close absorbed, cell already closed");
            return Ok(ClosedTask {
                close: CloseResult {
                    cell,
                    event: closed.event,
                    already_closed: true,
                },
                released: 0,
                signal: None,
                outcome: None,
            });
        }

        let released = release_agent_tx(&tx, project.as_str(), &agent)?;
        let signal = resolve_signal_tx(
            &tx,
            project.as_str(),
            &cell_id,
            request.signal_payload.as_ref(),
        )?;
        let outcome = append_event_tx(
            &tx,
            project.as_str(),
            &cell_id,
            &CellEvent::SubtaskOutcome(outcome),
        )?;
        let cell = require_cell_tx(&tx, project.as_str(), &cell_id)?;
        tx.commit()?;

        tracing::info!(
            project = %project,
            cell_id = %cell_id,
            agent = %agent,
            released,
            "task closed"
        );
        Ok(ClosedTask {
            close: CloseResult {
                cell,
                event: closed.event,
                already_closed: false,
            },
            released,
            signal: Some(signal),
            outcome: Some(outcome.event),
        })
    }
}
