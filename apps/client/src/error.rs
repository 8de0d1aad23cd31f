use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection failed: {0}")]
    Failed(String),
    #[error("agent is shut down")]
    Closed,
    #[error("invalid map layout: {0}")]
    Layout(String),
}
