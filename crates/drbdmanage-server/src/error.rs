//! Internal errors and their translation to the [`ErrorCode`] wire taxonomy
//! at the façade boundary.

use drbdmanage_config::ConfigError;
use drbdmanage_persistence::PersistenceError;
use drbdmanage_reconcile::ReconcileError;
use drbdmanage_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("validation failed: {0}")]
    Validation(ErrorCode),
}

impl ServerError {
    /// Classifies an internal error into the wire-facing [`ErrorCode`]
    /// taxonomy at the façade boundary.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Persistence(_) => ErrorCode::EPersist,
            ServerError::Config(_) => ErrorCode::EPlugin,
            ServerError::Reconcile(_) => ErrorCode::EPlugin,
            ServerError::Validation(code) => *code,
        }
    }
}

impl From<ServerError> for ErrorCode {
    fn from(err: ServerError) -> Self {
        err.error_code()
    }
}
