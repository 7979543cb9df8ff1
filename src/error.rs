use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid API document: {0}")]
    Validation(String),
    #[error("schema comparison failed: {0}")]
    Diff(String),
    #[error("source content unavailable: {0}")]
    Source(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to (de)serialize stored record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
    #[error("store task failed: {0}")]
    Task(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel misconfigured: {0}")]
    Config(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl ChannelError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
