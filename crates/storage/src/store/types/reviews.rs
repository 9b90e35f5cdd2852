#![forbid(unsafe_code)]

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    Rejected,
}

impl ReviewVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReviewRequest {
    pub cell_id: String,
    pub reviewer: String,
    pub verdict: ReviewVerdict,
    pub feedback: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewRow {
    pub seq: i64,
    pub cell_id: String,
    pub reviewer: String,
    pub verdict: ReviewVerdict,
    pub feedback: Option<String>,
    pub ts_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub latest: Option<ReviewRow>,
    pub rejections: u32,
}
