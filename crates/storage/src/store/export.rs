#![forbid(unsafe_code)]

use super::*;
use super::deps::rebuild_all_blocked_cache_tx;
use super::events::append_event_tx;
use cm_core::events::FieldChange;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

/// One line of the JSONL mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cell_type: CellType,
    pub status: CellStatus,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<RecordDependency>,
    #[serde(default)]
    pub content_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDependency {
    pub depends_on: String,
    pub relationship: DependencyKind,
}

impl CellRecord {
    /// sha256 over the record serialized with an empty hash field.
    pub fn compute_hash(&self) -> Result<String, StoreError> {
        let mut unhashed = self.clone();
        unhashed.content_hash = String::new();
        let bytes = serde_json::to_vec(&unhashed)?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

impl SqliteStore {
    /// Merges every dirty cell into the JSONL file at `path` (overwrite by id, sorted by id),
    /// then clears the marks of the cells written. A cell changed by another connection
    /// while the file is written stays dirty for the next export.
    pub fn export_dirty(
        &mut self,
        project: &ProjectKey,
        path: &Path,
    ) -> Result<ExportReport, StoreError> {
        let mut records = read_records(path)?;
        let marks = self.dirty_marks(project)?;
        let mut exported = Vec::with_capacity(marks.len());
        for mark in &marks {
            if let Some(record) = self.cell_record(project, &mark.cell_id)? {
                records.insert(record.id.clone(), record);
                exported.push(mark.cell_id.clone());
            }
        }
        write_records(path, &records)?;
        let cleared = self.clear_dirty_marks(project, &marks)?;

        tracing::info!(
            project = %project,
            path = %path.display(),
            exported = exported.len(),
            still_dirty = marks.len() - cleared,
            "dirty cells exported"
        );
        Ok(ExportReport {
            path: path.to_path_buf(),
            exported,
            total_records: records.len(),
        })
    }

    /// Rewrites the file from scratch with every cell and clears the marks it covered.
    pub fn export_all(&mut self, project: &ProjectKey, path: &Path) -> Result<ExportReport, StoreError> {
        let marks = self.dirty_marks(project)?;
        let ids = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM cells WHERE project=?1 ORDER BY id ASC")?;
            let rows = stmt.query_map(params![project.as_str()], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        };
        let mut records = BTreeMap::new();
        for cell_id in &ids {
            if let Some(record) = self.cell_record(project, cell_id)? {
                records.insert(record.id.clone(), record);
            }
        }
        write_records(path, &records)?;
        self.clear_dirty_marks(project, &marks)?;

        Ok(ExportReport {
            path: path.to_path_buf(),
            exported: ids,
            total_records: records.len(),
        })
    }

    pub fn cell_record(
        &self,
        project: &ProjectKey,
        cell_id: &str,
    ) -> Result<Option<CellRecord>, StoreError> {
        let Some(cell) = self.get_cell(project, cell_id)? else {
            return Ok(None);
        };
        let labels = self.get_labels(project, cell_id)?;
        let dependencies = self
            .get_dependencies(project, cell_id)?
            .into_iter()
            .map(|edge| RecordDependency {
                depends_on: edge.to_id,
                relationship: edge.relationship,
            })
            .collect();
        let mut record = CellRecord {
            id: cell.id,
            title: cell.title,
            description: cell.description,
            cell_type: cell.cell_type,
            status: cell.status,
            priority: cell.priority,
            parent_id: cell.parent_id,
            assignee: cell.assignee,
            created_at: ts_ms_to_rfc3339(cell.created_at_ms),
            updated_at: ts_ms_to_rfc3339(cell.updated_at_ms),
            closed_at: cell.closed_at_ms.map(ts_ms_to_rfc3339),
            closed_reason: cell.closed_reason,
            labels,
            dependencies,
            content_hash: String::new(),
        };
        record.content_hash = record.compute_hash()?;
        Ok(Some(record))
    }

    /// Replays an exported file as events. Cells that already exist are skipped; a record
    /// whose hash does not match is still imported and reported.
    pub fn import_jsonl(&mut self, project: &ProjectKey, path: &Path) -> Result<ImportReport, StoreError> {
        let records = read_records(path)?;
        let mut report = ImportReport::default();
        let project_str = project.as_str();

        let tx = self.write_tx()?;
        let mut fresh = Vec::new();
        for record in records.values() {
            if record.compute_hash()? != record.content_hash {
                report.hash_mismatches.push(record.id.clone());
            }
            if cell_exists_tx(&tx, project_str, &record.id)? {
                report.skipped.push(record.id.clone());
                continue;
            }
            let created_at_ms = rfc3339_to_ts_ms(&record.created_at);
            append_event_tx(
                &tx,
                project_str,
                &record.id,
                &CellEvent::CellCreated {
                    title: record.title.clone(),
                    description: record.description.clone(),
                    cell_type: record.cell_type,
                    priority: record.priority,
                    parent_id: record.parent_id.clone(),
                    created_at_ms,
                },
            )?;
            if record.assignee.is_some() {
                append_event_tx(
                    &tx,
                    project_str,
                    &record.id,
                    &CellEvent::CellUpdated {
                        changes: vec![FieldChange::Assignee {
                            old: None,
                            new: record.assignee.clone(),
                        }],
                    },
                )?;
            }
            for label in &record.labels {
                append_event_tx(
                    &tx,
                    project_str,
                    &record.id,
                    &CellEvent::CellLabelAdded {
                        label: label.clone(),
                    },
                )?;
            }
            fresh.push(record);
        }

        // Edges need both ends to exist, and must land before any close.
        for record in &fresh {
            for dep in &record.dependencies {
                if !cell_exists_tx(&tx, project_str, &dep.depends_on)? {
                    tracing::warn!(
                        cell_id = %record.id,
                        depends_on = %dep.depends_on,
                        "import skipped dependency on unknown cell"
                    );
                    continue;
                }
                append_event_tx(
                    &tx,
                    project_str,
                    &record.id,
                    &CellEvent::CellDependencyAdded {
                        depends_on: dep.depends_on.clone(),
                        relationship: dep.relationship,
                    },
                )?;
            }
        }

        for record in &fresh {
            for event in status_path(record) {
                append_event_tx(&tx, project_str, &record.id, &event)?;
            }
            tx.execute(
                "DELETE FROM dirty_cells WHERE project=?1 AND cell_id=?2",
                params![project_str, record.id],
            )?;
            report.imported.push(record.id.clone());
        }
        rebuild_all_blocked_cache_tx(&tx, project_str, now_ms())?;
        tx.commit()?;

        tracing::info!(
            project = %project,
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            hash_mismatches = report.hash_mismatches.len(),
            "jsonl imported"
        );
        Ok(report)
    }
}

/// Events that walk a fresh (open) cell to the record's status.
fn status_path(record: &CellRecord) -> Vec<CellEvent> {
    let step = |from, to| CellEvent::CellStatusChanged {
        from,
        to,
        reason: None,
    };
    match record.status {
        CellStatus::Open => Vec::new(),
        CellStatus::InProgress => vec![step(CellStatus::Open, CellStatus::InProgress)],
        CellStatus::Blocked => vec![
            step(CellStatus::Open, CellStatus::InProgress),
            step(CellStatus::InProgress, CellStatus::Blocked),
        ],
        CellStatus::Closed => vec![CellEvent::CellClosed {
            reason: record
                .closed_reason
                .clone()
                .unwrap_or_else(|| "imported".to_string()),
        }],
        CellStatus::Tombstone => vec![CellEvent::CellStatusChanged {
            from: CellStatus::Open,
            to: CellStatus::Tombstone,
            reason: record.closed_reason.clone(),
        }],
    }
}

fn read_records(path: &Path) -> Result<BTreeMap<String, CellRecord>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    let mut records = BTreeMap::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: CellRecord =
            serde_json::from_str(line).map_err(|err| StoreError::CorruptExport {
                line: index + 1,
                message: err.to_string(),
            })?;
        records.insert(record.id.clone(), record);
    }
    Ok(records)
}

/// Write-then-rename so readers never see a half-written file.
fn write_records(path: &Path, records: &BTreeMap<String, CellRecord>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        for record in records.values() {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
