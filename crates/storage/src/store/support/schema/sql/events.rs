#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        -- Append-only. Rows are never updated or deleted; projections are rebuilt from here.
        CREATE TABLE IF NOT EXISTS events (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          project TEXT NOT NULL,
          cell_id TEXT NOT NULL,
          ts_ms INTEGER NOT NULL,
          type TEXT NOT NULL,
          payload_json TEXT NOT NULL
        );
"#;
