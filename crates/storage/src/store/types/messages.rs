#![forbid(unsafe_code)]

use cm_core::model::Importance;

#[derive(Clone, Debug)]
pub struct SendMessageRequest {
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub importance: Importance,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRow {
    pub seq: i64,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub importance: Importance,
    pub created_at_ms: i64,
    pub read_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct InboxRequest {
    pub agent: String,
    pub unread_only: bool,
    pub limit: usize,
}
