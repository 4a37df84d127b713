//! The in-memory cluster configuration object: the aggregate of every
//! entity in the domain model plus the serial number used to detect and
//! force change.
//!
//! This is exactly what the persistence gateway loads, hashes, and saves
//! as a single unit, and what the reconciliation engine and server façade
//! operate on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::{
    Assignment, Node, Resource, Snapshot, SnapshotAssignment, SnapshotVolumeState, Volume,
    VolumeState,
};

/// Key identifying an [`Assignment`]: `(node_name, resource_name)`.
pub type AssignmentKey = (String, String);

/// Key identifying a [`VolumeState`]: `(node_name, resource_name, vol_nr)`.
pub type VolumeStateKey = (String, String, u16);

/// The full cluster configuration, persisted as a single unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Bumped on every mutation; forces the persisted byte image (and thus
    /// its content hash) to change even when no entity field differs,
    /// guaranteeing peers observe a change and reconcile ("poke").
    pub serial: u64,
    pub nodes: BTreeMap<String, Node>,
    pub resources: BTreeMap<String, Resource>,
    pub volumes: BTreeMap<(String, u16), Volume>,
    pub assignments: BTreeMap<AssignmentKey, Assignment>,
    pub volume_states: BTreeMap<VolumeStateKey, VolumeState>,
    pub snapshots: BTreeMap<(String, String), Snapshot>,
    pub snapshot_assignments: BTreeMap<(String, String, String), SnapshotAssignment>,
    pub snapshot_volume_states: BTreeMap<(String, String, String, u16), SnapshotVolumeState>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the serial number without otherwise touching any entity.
    /// Used when a change must be visible to peers even though nothing in
    /// the entity set itself differs (e.g. after a failed reconcile attempt
    /// that should still be retried cluster-wide).
    pub fn poke(&mut self) {
        self.serial = self.serial.wrapping_add(1);
    }

    pub fn assignments_for_resource<'a>(
        &'a self,
        resource_name: &'a str,
    ) -> impl Iterator<Item = &'a Assignment> {
        self.assignments
            .values()
            .filter(move |a| a.resource_name == resource_name)
    }

    pub fn assignments_for_node<'a>(
        &'a self,
        node_name: &'a str,
    ) -> impl Iterator<Item = &'a Assignment> {
        self.assignments
            .values()
            .filter(move |a| a.node_name == node_name)
    }

    pub fn volume_states_for_assignment<'a>(
        &'a self,
        node_name: &'a str,
        resource_name: &'a str,
    ) -> impl Iterator<Item = &'a VolumeState> {
        self.volume_states
            .values()
            .filter(move |vs| vs.node_name == node_name && vs.resource_name == resource_name)
    }

    pub fn volumes_for_resource<'a>(
        &'a self,
        resource_name: &'a str,
    ) -> impl Iterator<Item = &'a Volume> {
        self.volumes
            .values()
            .filter(move |v| v.resource_name == resource_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poke_increments_serial_only() {
        let mut state = ClusterState::new();
        assert_eq!(state.serial, 0);
        state.poke();
        assert_eq!(state.serial, 1);
        assert!(state.nodes.is_empty());
    }

    #[test]
    fn poke_wraps_instead_of_panicking() {
        let mut state = ClusterState {
            serial: u64::MAX,
            ..ClusterState::new()
        };
        state.poke();
        assert_eq!(state.serial, 0);
    }
}
