#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct ReserveRequest {
    pub agent: String,
    pub paths: Vec<String>,
    pub exclusive: bool,
    pub reason: Option<String>,
    /// `None` holds until released.
    pub ttl_ms: Option<i64>,
}

impl ReserveRequest {
    pub fn exclusive(agent: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            agent: agent.into(),
            paths,
            exclusive: true,
            reason: None,
            ttl_ms: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationRow {
    pub path: String,
    pub agent: String,
    pub exclusive: bool,
    pub reason: Option<String>,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationConflict {
    pub requested_path: String,
    pub held_path: String,
    pub holder: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReservationGrant {
    pub granted: Vec<ReservationRow>,
}
