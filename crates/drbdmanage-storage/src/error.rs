//! Storage backend errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend {0:?} is not registered")]
    UnknownPlugin(String),

    #[error("blockdevice for {resource}/{vol_nr} not found")]
    BlockDeviceNotFound { resource: String, vol_nr: u16 },

    #[error("storage backend operation failed: {0}")]
    BackendFailed(String),
}
