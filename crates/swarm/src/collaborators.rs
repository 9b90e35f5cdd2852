#![forbid(unsafe_code)]

//! Seams to the world outside the database: agent messaging, long-term memory, tool lookup.

use cm_core::ids::ProjectKey;
use cm_storage::{InboxRequest, MessageRow, SendMessageRequest, SqliteStore, StoreError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}

pub trait Messenger {
    fn send_message(&mut self, request: SendMessageRequest) -> Result<MessageRow, CollaboratorError>;
    fn inbox(&mut self, agent: &str) -> Result<Vec<MessageRow>, CollaboratorError>;
}

/// Messages kept in the project database, on a connection of its own.
pub struct SqliteMessenger {
    store: SqliteStore,
    project: ProjectKey,
}

impl SqliteMessenger {
    pub fn open(storage_dir: impl AsRef<Path>, project: ProjectKey) -> Result<Self, CollaboratorError> {
        let store = SqliteStore::open(storage_dir)?;
        Ok(Self { store, project })
    }

    pub fn ack(&mut self, agent: &str, seqs: &[i64]) -> Result<usize, CollaboratorError> {
        Ok(self.store.ack_messages(&self.project, agent, seqs)?)
    }
}

impl Messenger for SqliteMessenger {
    fn send_message(&mut self, request: SendMessageRequest) -> Result<MessageRow, CollaboratorError> {
        Ok(self.store.send_message(&self.project, request)?)
    }

    fn inbox(&mut self, agent: &str) -> Result<Vec<MessageRow>, CollaboratorError> {
        Ok(self.store.inbox(
            &self.project,
            InboxRequest {
                agent: agent.to_string(),
                unread_only: true,
                limit: 0,
            },
        )?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub cell_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub files_touched: Vec<String>,
    pub ts_ms: i64,
}

pub trait MemoryStore {
    /// `Ok(false)` means the store is switched off, not that the capture failed.
    fn capture(&mut self, entry: &MemoryEntry) -> Result<bool, CollaboratorError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMemory;

impl MemoryStore for NoopMemory {
    fn capture(&mut self, _entry: &MemoryEntry) -> Result<bool, CollaboratorError> {
        Ok(false)
    }
}

/// Appends one JSON line per captured learning.
#[derive(Clone, Debug)]
pub struct JsonlMemory {
    path: PathBuf,
}

impl JsonlMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryStore for JsonlMemory {
    fn capture(&mut self, entry: &MemoryEntry) -> Result<bool, CollaboratorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(true)
    }
}

pub trait ToolLocator {
    fn is_tool_available(&self, name: &str) -> bool;
}

/// An ordered list of directories searched for bare program names.
#[derive(Clone, Debug, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// The directories of the current `PATH`; empty when it is unset.
    pub fn from_env() -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();
        Self::with_dirs(dirs)
    }

    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        let dirs = dirs
            .into_iter()
            .filter(|dir| !dir.as_os_str().is_empty())
            .collect();
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Full path of the program. A name with a separator is taken as a path and checked
    /// as is; a bare name resolves to its first executable hit.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let direct = Path::new(name);
        if direct.components().count() > 1 {
            return runnable(direct).then(|| direct.to_path_buf());
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| runnable(candidate))
    }
}

impl ToolLocator for SearchPath {
    fn is_tool_available(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }
}

fn runnable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_stub(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let stub = dir.join(name);
        std::fs::write(&stub, "#!/bin/sh\necho ok\n").expect("write stub");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&stub).expect("meta").permissions();
            perms.set_mode(mode);
            std::fs::set_permissions(&stub, perms).expect("chmod");
        }
        #[cfg(not(unix))]
        let _ = mode;
        stub
    }

    #[test]
    fn search_path_finds_the_first_executable() {
        let first = tempfile::tempdir().expect("first dir");
        let second = tempfile::tempdir().expect("second dir");
        let hit = write_stub(first.path(), "tsc", 0o755);
        write_stub(second.path(), "tsc", 0o755);

        let search = SearchPath::with_dirs(vec![
            PathBuf::new(),
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(search.dirs().len(), 2);
        assert_eq!(search.locate("tsc"), Some(hit.clone()));
        assert_eq!(search.locate(" tsc "), Some(hit.clone()));
        assert_eq!(search.locate("missing-tool"), None);
        assert!(!search.is_tool_available("   "));

        let nowhere = SearchPath::with_dirs(Vec::new());
        assert!(nowhere.is_tool_available(&hit.to_string_lossy()));
        assert!(!nowhere.is_tool_available("tsc"));
    }

    #[cfg(unix)]
    #[test]
    fn search_path_skips_files_without_exec_bits() {
        let plain = tempfile::tempdir().expect("plain dir");
        let exec = tempfile::tempdir().expect("exec dir");
        write_stub(plain.path(), "lint", 0o644);
        let hit = write_stub(exec.path(), "lint", 0o755);

        let search = SearchPath::with_dirs(vec![plain.path().to_path_buf(), exec.path().to_path_buf()]);
        assert_eq!(search.locate("lint"), Some(hit));
        assert!(!search.is_tool_available(&plain.path().join("lint").to_string_lossy()));
        assert!(!search.is_tool_available(&plain.path().to_string_lossy()));
    }

    #[test]
    fn jsonl_memory_appends_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut memory = JsonlMemory::new(dir.path().join("memory/learnings.jsonl"));
        let entry = MemoryEntry {
            cell_id: "web-1".to_string(),
            title: "Fix login".to_string(),
            summary: Some("null session on refresh".to_string()),
            files_touched: vec!["src/auth.ts".to_string()],
            ts_ms: 1,
        };
        assert!(memory.capture(&entry).expect("first"));
        assert!(memory.capture(&entry).expect("second"));
        let raw = std::fs::read_to_string(memory.path()).expect("read");
        assert_eq!(raw.lines().count(), 2);
        assert!(!NoopMemory.capture(&entry).expect("noop"));
    }
}
