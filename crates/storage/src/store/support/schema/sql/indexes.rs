#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_events_project_seq ON events(project, seq);
        CREATE INDEX IF NOT EXISTS idx_events_cell_seq ON events(project, cell_id, seq);
        CREATE INDEX IF NOT EXISTS idx_cells_ready ON cells(project, status, priority, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_cells_parent ON cells(project, parent_id, id);
        CREATE INDEX IF NOT EXISTS idx_dependencies_to ON dependencies(project, to_id, relationship);
        CREATE INDEX IF NOT EXISTS idx_reservations_agent ON reservations(project, agent);
        CREATE INDEX IF NOT EXISTS idx_swarm_contexts_epic ON swarm_contexts(project, epic_id, updated_at_ms);
        CREATE INDEX IF NOT EXISTS idx_strikes_cell ON strikes(project, cell_id, seq);
        CREATE INDEX IF NOT EXISTS idx_reviews_cell ON reviews(project, cell_id, seq);
        CREATE INDEX IF NOT EXISTS idx_recipients_agent ON message_recipients(project, agent, read_at_ms);
"#;
