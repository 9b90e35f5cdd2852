#![forbid(unsafe_code)]

/// Outcome of resolving a completion signal. Every variant is a success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalResolution {
    Resolved,
    AlreadyResolved,
    Absent,
}
