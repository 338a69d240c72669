use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("Failed to read overlay state: {0}")]
    ReadFailed(String),

    #[error("Failed to persist overlay state: {0}")]
    PersistenceFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
