//! The cluster configuration's domain entities.
//!
//! Every entity carries a `cstate` (observed/current state) and `tstate`
//! (desired/target state) pair of [`StateFlags`], plus a [`PropsContainer`]
//! for caller-supplied properties. The reconciliation engine reads the
//! cstate/tstate pair to decide what, if anything, needs to change.

use drbdmanage_types::{MinorNr, NodeId, PortNr, StateFlags, VolNr};
use serde::{Deserialize, Serialize};

use crate::props::PropsContainer;

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub node_id: NodeId,
    pub addr: String,
    pub af: AddressFamily,
    pub poolsize_kib: Option<u64>,
    pub poolfree_kib: Option<u64>,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
}

/// Address family of a [`Node`]'s replication address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// A replicated DRBD resource definition, shared by all of its assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub port: PortNr,
    pub secret: String,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
}

/// A volume definition within a [`Resource`] (size and volume number are
/// shared by every node's deployment of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub resource_name: String,
    pub vol_nr: VolNr,
    pub minor: MinorNr,
    pub size_kib: u64,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
}

/// The deployment of a [`Resource`] onto one [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub node_name: String,
    pub resource_name: String,
    pub node_id_in_res: NodeId,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
    /// Consecutive reconciliation failures for this assignment; reset by
    /// the `resume` operation. The reconciler skips assignments above a
    /// configured retry ceiling until `resume` is called.
    pub failure_count: u32,
}

/// The deployment of one [`Volume`] as part of an [`Assignment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeState {
    pub node_name: String,
    pub resource_name: String,
    pub vol_nr: VolNr,
    pub blockdevice_path: Option<String>,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
}

/// A point-in-time snapshot of a [`Resource`] across the nodes it was
/// deployed on at the time the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub resource_name: String,
    pub snapshot_name: String,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
}

/// The deployment of a [`Snapshot`] onto one node that held the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotAssignment {
    pub node_name: String,
    pub resource_name: String,
    pub snapshot_name: String,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
    pub props: PropsContainer,
}

/// Per-volume metadata captured within a [`SnapshotAssignment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVolumeState {
    pub node_name: String,
    pub resource_name: String,
    pub snapshot_name: String,
    pub vol_nr: VolNr,
    pub size_kib: u64,
    pub cstate: StateFlags,
    pub tstate: StateFlags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use drbdmanage_types::assg_flags;

    #[test]
    fn assignment_failure_count_starts_at_zero() {
        let assignment = Assignment {
            node_name: "alpha".to_string(),
            resource_name: "res0".to_string(),
            node_id_in_res: NodeId::from(0),
            cstate: StateFlags::NONE,
            tstate: StateFlags::NONE.set(assg_flags::DEPLOY),
            props: PropsContainer::new(),
            failure_count: 0,
        };
        assert_eq!(assignment.failure_count, 0);
        assert!(assignment.tstate.is_set(assg_flags::DEPLOY));
        assert!(!assignment.cstate.is_set(assg_flags::DEPLOY));
    }
}
