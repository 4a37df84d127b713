//! # drbdmanage-persistence: the cluster control-volume gateway
//!
//! Owns the only code in the workspace that touches the replicated control
//! volume directly. Everything above this crate works with [`ClusterState`]
//! values and hash comparisons, never raw bytes or lock state.

mod error;
mod gateway;
mod hash;

pub use error::PersistenceError;
pub use gateway::PersistenceGateway;
pub use hash::{hash_bytes, ConfigHash};
