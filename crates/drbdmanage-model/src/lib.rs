//! # drbdmanage-model: the cluster configuration domain model
//!
//! This crate has no I/O and no knowledge of persistence, reconciliation,
//! or transport: it is the pure data model (property bag, entities, ID
//! allocators) that every other crate in the workspace builds on.

mod allocator;
mod cluster;
mod entities;
mod error;
mod props;

pub use allocator::RangeAllocator;
pub use cluster::{AssignmentKey, ClusterState, VolumeStateKey};
pub use entities::{
    AddressFamily, Assignment, Node, Resource, Snapshot, SnapshotAssignment,
    SnapshotVolumeState, Volume, VolumeState,
};
pub use error::ModelError;
pub use props::{PropsContainer, AUX_PROP_PREFIX};
