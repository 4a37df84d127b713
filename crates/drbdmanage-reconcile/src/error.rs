//! Reconciliation engine errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to encode cluster state for hashing: {0}")]
    Encode(#[from] postcard::Error),
}
