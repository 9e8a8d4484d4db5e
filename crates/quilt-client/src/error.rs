use quilt_crdt::CrdtError;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Crdt(#[from] CrdtError),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
