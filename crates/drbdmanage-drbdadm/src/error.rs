//! Errors from writing `.res` files or invoking external DRBD tools.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrbdAdmError {
    #[error("failed to write resource file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to launch {tool}: {source}")]
    SpawnFailed {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} exited with status {status}: {stderr}")]
    CommandFailed {
        tool: String,
        status: i32,
        stderr: String,
    },
}
