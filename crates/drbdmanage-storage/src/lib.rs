//! # drbdmanage-storage: the storage backend interface
//!
//! Defines the contract the reconciliation engine uses to create, remove,
//! and extend volumes, plus a registry resolving a backend by the
//! configured `storage-plugin` name. Concrete backends are out of scope.

pub mod backend;
mod error;
mod registry;

pub use backend::{PoolStats, StorageBackend};
pub use error::StorageError;
pub use registry::StorageRegistry;
