#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS reservations (
          project TEXT NOT NULL,
          path TEXT NOT NULL,
          agent TEXT NOT NULL,
          exclusive INTEGER NOT NULL,
          reason TEXT,
          created_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER,
          PRIMARY KEY (project, path, agent)
        );

        -- One snapshot per (epic, cell); overwritten in place.
        CREATE TABLE IF NOT EXISTS swarm_contexts (
          project TEXT NOT NULL,
          epic_id TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          agent TEXT,
          files_modified_json TEXT NOT NULL,
          progress_percent INTEGER NOT NULL,
          directives_json TEXT NOT NULL,
          recovery_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (project, epic_id, cell_id)
        );

        CREATE TABLE IF NOT EXISTS strikes (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          attempt TEXT NOT NULL,
          reason TEXT NOT NULL,
          ts_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reviews (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          reviewer TEXT NOT NULL,
          verdict TEXT NOT NULL,
          feedback TEXT,
          ts_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS completion_signals (
          project TEXT NOT NULL,
          task_id TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          resolved_at_ms INTEGER,
          payload_json TEXT,
          PRIMARY KEY (project, task_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          project TEXT NOT NULL,
          thread_id TEXT NOT NULL,
          from_agent TEXT NOT NULL,
          subject TEXT NOT NULL,
          body TEXT NOT NULL,
          importance TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_recipients (
          project TEXT NOT NULL,
          message_seq INTEGER NOT NULL,
          agent TEXT NOT NULL,
          read_at_ms INTEGER,
          PRIMARY KEY (project, message_seq, agent)
        );
"#;
