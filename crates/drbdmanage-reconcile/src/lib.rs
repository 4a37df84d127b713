//! # drbdmanage-reconcile: the reconciliation engine
//!
//! Drives every assignment's observed state (`cstate`) toward its desired
//! state (`tstate`) by calling the storage backend and DRBD admin
//! interface, then runs the garbage-collection cascade. Also implements
//! the change notifier trait used to report what the reconciler did.

mod engine;
mod error;
mod notifier;
mod report;

pub use engine::{Reconciler, RESIZE_PENDING_PROP};
pub use error::ReconcileError;
pub use notifier::{ChangeNotifier, NullNotifier, ObjectPath, RecordingNotifier};
pub use report::RunReport;
