//! Event ingestion pipeline.
//!
//! Supervises a long-running `drbdsetup events2 all` subprocess, parses its
//! line stream, and tells the caller whether a reconcile pass should be
//! scheduled. Everything else — when to actually run a reconcile, how the
//! subprocess's fd integrates with the rest of the daemon's poll loop — is
//! the caller's job; this crate only owns the subprocess and the line
//! protocol.

mod error;
mod line;
mod supervisor;

pub use error::EventsError;
pub use line::{is_reconcile_trigger, EventLine};
pub use supervisor::EventsSupervisor;
