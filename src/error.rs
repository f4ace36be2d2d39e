use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl Error {
    /// True for failures of the persisted state rather than of the request.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Corrupt(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
