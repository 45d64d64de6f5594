use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by brain persistence.
#[derive(Error, Debug)]
pub enum BrainError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a brain file (bad cookie)")]
    BadCookie,

    #[error("corrupt brain file: {0}")]
    Corrupt(String),

    #[error("timed out after {waited:?} waiting for the lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
}

pub type Result<T> = std::result::Result<T, BrainError>;
