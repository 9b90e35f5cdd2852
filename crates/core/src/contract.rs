#![forbid(unsafe_code)]

use crate::glob::{glob_match, is_glob, normalize_path};
use serde::{Deserialize, Serialize};

/// Result of comparing what an agent touched against what it was assigned.
///
/// Violations are informational: they feed the outcome event, never the close decision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractReport {
    pub checked: bool,
    pub files_owned: Vec<String>,
    pub files_touched: Vec<String>,
    pub violations: Vec<String>,
}

impl ContractReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn validate_contract(files_touched: &[String], files_owned: &[String]) -> ContractReport {
    let owned = files_owned
        .iter()
        .map(|p| normalize_path(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>();
    let touched = files_touched
        .iter()
        .map(|p| normalize_path(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>();

    // No assignment means nothing to hold the agent to.
    if owned.is_empty() {
        return ContractReport {
            checked: false,
            files_owned: owned,
            files_touched: touched,
            violations: Vec::new(),
        };
    }

    let mut violations = touched
        .iter()
        .filter(|file| !is_owned(file, &owned))
        .cloned()
        .collect::<Vec<_>>();
    violations.sort();
    violations.dedup();

    ContractReport {
        checked: true,
        files_owned: owned,
        files_touched: touched,
        violations,
    }
}

fn is_owned(file: &str, owned: &[String]) -> bool {
    owned
        .iter()
        .any(|pattern| pattern == file || (is_glob(pattern) && glob_match(pattern, file)))
}
