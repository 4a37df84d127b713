//! Persistence gateway errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] drbdmanage_io::IoError),

    #[error("failed to lock control volume at {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize cluster configuration: {0}")]
    Encode(#[from] postcard::Error),

    #[error("control volume is not open")]
    NotOpen,
}
