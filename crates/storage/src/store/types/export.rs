#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ExportReport {
    pub path: PathBuf,
    pub exported: Vec<String>,
    pub total_records: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub skipped: Vec<String>,
    pub hash_mismatches: Vec<String>,
}
