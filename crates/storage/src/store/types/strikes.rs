#![forbid(unsafe_code)]

use cm_core::strikes::StrikeRecord;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrikeStatus {
    pub cell_id: String,
    pub count: u32,
    pub is_struck_out: bool,
    pub strikes: Vec<StrikeRecord>,
    pub architecture_prompt: Option<String>,
}
