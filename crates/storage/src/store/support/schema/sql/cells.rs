#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS cells (
          project TEXT NOT NULL,
          id TEXT NOT NULL,
          title TEXT NOT NULL,
          description TEXT,
          cell_type TEXT NOT NULL,
          status TEXT NOT NULL,
          priority INTEGER NOT NULL,
          parent_id TEXT,
          assignee TEXT,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          closed_at_ms INTEGER,
          closed_reason TEXT,
          last_seq INTEGER NOT NULL,
          PRIMARY KEY (project, id)
        );

        CREATE TABLE IF NOT EXISTS dependencies (
          project TEXT NOT NULL,
          from_id TEXT NOT NULL,
          to_id TEXT NOT NULL,
          relationship TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (project, from_id, to_id, relationship)
        );

        CREATE TABLE IF NOT EXISTS labels (
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          label TEXT NOT NULL,
          seq INTEGER NOT NULL,
          PRIMARY KEY (project, cell_id, label)
        );

        CREATE TABLE IF NOT EXISTS comments (
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          seq INTEGER NOT NULL,
          author TEXT NOT NULL,
          body TEXT NOT NULL,
          ts_ms INTEGER NOT NULL,
          PRIMARY KEY (project, cell_id, seq)
        );

        -- Direct blockers as of the last rebuild for that cell. Never refreshed on write.
        CREATE TABLE IF NOT EXISTS blocked_cache (
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          blocker_id TEXT NOT NULL,
          rebuilt_at_ms INTEGER NOT NULL,
          PRIMARY KEY (project, cell_id, blocker_id)
        );

        CREATE TABLE IF NOT EXISTS dirty_cells (
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          marked_at_ms INTEGER NOT NULL,
          -- seq of the latest event that marked the cell; exports clear up to a snapshot of it
          mark_seq INTEGER NOT NULL,
          PRIMARY KEY (project, cell_id)
        );
"#;
