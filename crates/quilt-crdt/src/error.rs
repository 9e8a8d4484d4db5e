use crate::id::ElementId;

/// Errors surfaced by the CRDT core.
///
/// Duplicate-create and delete-not-found are contract violations when they
/// come from local code, but expected no-ops for replayed network delivery;
/// callers decide which policy applies.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    #[error("duplicate element id: {0}")]
    DuplicateId(ElementId),

    #[error("unknown element id: {0}")]
    NotFound(ElementId),

    #[error("malformed element id: {0:?}")]
    MalformedId(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, CrdtError>;
