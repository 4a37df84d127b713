//! Event pipeline errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventsError {
    #[error("failed to spawn events2 subprocess: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("events2 subprocess has no stdout pipe")]
    NoStdout,

    #[error("failed to register events2 pipe with the event loop: {0}")]
    Register(std::io::Error),
}
