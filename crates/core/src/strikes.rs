#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const STRIKE_LIMIT: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeRecord {
    pub attempt: String,
    pub reason: String,
    pub ts_ms: i64,
}

pub fn is_struck_out(count: u32) -> bool {
    count >= STRIKE_LIMIT
}

/// Escalation text handed to a human once automated fixing has failed three times.
pub fn architecture_review_prompt(
    cell_id: &str,
    title: Option<&str>,
    strikes: &[StrikeRecord],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("ARCHITECTURE REVIEW REQUIRED for {cell_id}"));
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        out.push_str(&format!(" ({title})"));
    }
    out.push_str(&format!(
        "\n\n{} consecutive fix attempts failed. Stop patching symptoms and question the approach.\n\nFailed attempts:\n",
        strikes.len()
    ));
    for (index, strike) in strikes.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} -> {}\n",
            index + 1,
            strike.attempt.trim(),
            strike.reason.trim()
        ));
    }
    out.push_str(
        "\nQuestions:\n\
         - Is the underlying design sound, or is it the source of the repeated failures?\n\
         - Do the failures share a root cause that none of the attempts addressed?\n\
         - Should the task be split, re-scoped, or handed to a human?\n\n\
         Automated fixes stay disabled until the strikes are cleared.\n",
    );
    out
}
