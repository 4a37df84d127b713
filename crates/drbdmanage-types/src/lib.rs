//! # drbdmanage-types: shared types for the drbdmanage cluster daemon
//!
//! This crate contains types shared across the workspace:
//! - Cluster-unique numeric identifiers ([`NodeId`], [`PortNr`], [`MinorNr`], [`VolNr`])
//! - State-flag bitfields for current/target state tracking ([`StateFlags`], [`node_flags`], [`rsc_flags`], [`vlm_flags`], [`assg_flags`])
//! - The RPC-facing error taxonomy ([`ErrorCode`])

use std::fmt::{Debug, Display};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

// ============================================================================
// Cluster-unique numeric identifiers — all Copy (cheap, small values)
// ============================================================================

/// Cluster-unique node identifier (DRBD9 protocol node id, `0..=max_node_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// TCP port number reserved for a resource's replication traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortNr(u16);

impl PortNr {
    pub fn new(port: u16) -> Self {
        Self(port)
    }
}

impl Display for PortNr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PortNr {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<PortNr> for u16 {
    fn from(port: PortNr) -> Self {
        port.0
    }
}

/// DRBD minor device number (`/dev/drbdN`) reserved for a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MinorNr(u32);

impl MinorNr {
    /// Highest minor number the kernel module will hand a device, bounding
    /// the allocator range above the configured `min-minor-nr` floor.
    pub const MAX: u32 = 1_048_575;

    pub fn new(minor: u32) -> Self {
        Self(minor)
    }
}

impl Display for MinorNr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MinorNr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MinorNr> for u32 {
    fn from(minor: MinorNr) -> Self {
        minor.0
    }
}

/// Volume number, unique within a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolNr(u16);

impl VolNr {
    pub fn new(vol_nr: u16) -> Self {
        Self(vol_nr)
    }
}

impl Display for VolNr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for VolNr {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<VolNr> for u16 {
    fn from(vol_nr: VolNr) -> Self {
        vol_nr.0
    }
}

// ============================================================================
// State-flag bitfields — cstate/tstate for the domain model's entities
// ============================================================================

/// A 64-bit state-flag bitfield, used for both the current (`cstate`) and
/// target (`tstate`) state of every entity in the domain model.
///
/// Named bit constants live in the `*_flags` modules below, grouped by the
/// entity type they apply to so each entity's flag namespace stays separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateFlags(u64);

impl StateFlags {
    pub const NONE: Self = Self(0);

    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if every bit set in `mask` is also set in `self`.
    pub const fn is_set(self, mask: Self) -> bool {
        (self.0 & mask.0) == mask.0
    }

    /// True if at least one bit of `mask` is set in `self`.
    pub const fn any_set(self, mask: Self) -> bool {
        (self.0 & mask.0) != 0
    }

    #[must_use]
    pub const fn set(self, mask: Self) -> Self {
        Self(self.0 | mask.0)
    }

    #[must_use]
    pub const fn clear(self, mask: Self) -> Self {
        Self(self.0 & !mask.0)
    }
}

impl BitOr for StateFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StateFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for StateFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// Flags shared by every entity (`FLAG_REMOVE` marks an entity pending
/// garbage collection once it has no more references).
pub mod common_flags {
    use super::StateFlags;

    pub const REMOVE: StateFlags = StateFlags::new(1 << 0);
    pub const UPD_CON: StateFlags = StateFlags::new(1 << 1);
}

/// Flags on a `Node`.
pub mod node_flags {
    use super::StateFlags;

    pub const REMOVE: StateFlags = StateFlags::new(1 << 0);
    pub const UPDATE: StateFlags = StateFlags::new(1 << 1);
    pub const UPD_POOL: StateFlags = StateFlags::new(1 << 2);
    pub const QIGNORE: StateFlags = StateFlags::new(1 << 3);
}

/// Flags on a `Resource`.
pub mod rsc_flags {
    use super::StateFlags;

    pub const REMOVE: StateFlags = StateFlags::new(1 << 0);
}

/// Flags on a `Volume`.
pub mod vlm_flags {
    use super::StateFlags;

    pub const REMOVE: StateFlags = StateFlags::new(1 << 0);
    pub const DEPLOY: StateFlags = StateFlags::new(1 << 1);
}

/// Flags on an `Assignment` (the per-node deployment of a `Resource`).
pub mod assg_flags {
    use super::StateFlags;

    pub const DEPLOY: StateFlags = StateFlags::new(1 << 0);
    pub const ATTACH: StateFlags = StateFlags::new(1 << 1);
    pub const CONNECT: StateFlags = StateFlags::new(1 << 2);
    pub const DISKLESS: StateFlags = StateFlags::new(1 << 3);
    pub const DISCARD: StateFlags = StateFlags::new(1 << 4);
    pub const OVERWRITE: StateFlags = StateFlags::new(1 << 5);
    pub const UPD_CON: StateFlags = StateFlags::new(1 << 6);
    pub const UPD_CONFIG: StateFlags = StateFlags::new(1 << 7);
    pub const RECONNECT: StateFlags = StateFlags::new(1 << 8);
}

/// Flags on a `VolumeState` (the per-node deployment of one `Volume`).
pub mod vlm_state_flags {
    use super::StateFlags;

    pub const DEPLOY: StateFlags = StateFlags::new(1 << 0);
    pub const ATTACH: StateFlags = StateFlags::new(1 << 1);
}

/// Flags on a `Snapshot`/`SnapshotAssignment`/`SnapshotVolumeState`.
pub mod snapshot_flags {
    use super::StateFlags;

    pub const REMOVE: StateFlags = StateFlags::new(1 << 0);
    pub const DEPLOY: StateFlags = StateFlags::new(1 << 1);
}

// ============================================================================
// RPC-facing error taxonomy
// ============================================================================

/// Result codes returned by the server façade's mutator/query API.
///
/// `Success` carries no payload; every other variant corresponds to a
/// specific, well-known failure condition so that an RPC client (out of
/// scope for this core) can branch on the code without parsing a message
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ErrorCode {
    #[error("success")]
    Success,
    #[error("no such object")]
    ENoEnt,
    #[error("object already exists")]
    EExist,
    #[error("invalid argument")]
    EInval,
    #[error("invalid name")]
    EName,
    #[error("no free port number available")]
    EPort,
    #[error("no free minor number available")]
    EMinor,
    #[error("no free volume id available")]
    EVolId,
    #[error("invalid volume size")]
    EVolSz,
    #[error("no free node id available")]
    ENodeId,
    #[error("too many nodes for this operation")]
    ENodeCnt,
    #[error("shared secret generation failed")]
    ESecretG,
    #[error("persistence layer error")]
    EPersist,
    #[error("plugin error")]
    EPlugin,
    #[error("storage backend error")]
    EStorage,
    #[error("control volume error")]
    ECtrlVol,
    #[error("operation not implemented")]
    ENotImpl,
    #[error("internal error")]
    Debug,
}

impl ErrorCode {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_flags_set_and_clear() {
        let mut flags = StateFlags::NONE;
        flags |= assg_flags::DEPLOY;
        assert!(flags.is_set(assg_flags::DEPLOY));
        assert!(!flags.is_set(assg_flags::CONNECT));

        flags = flags.clear(assg_flags::DEPLOY);
        assert!(!flags.is_set(assg_flags::DEPLOY));
    }

    #[test]
    fn state_flags_is_set_requires_all_bits() {
        let combined = assg_flags::DISKLESS | assg_flags::DISCARD;
        let only_diskless = StateFlags::NONE.set(assg_flags::DISKLESS);
        assert!(!only_diskless.is_set(combined));
        assert!(only_diskless.any_set(combined));
    }

    #[test]
    fn node_id_roundtrips_through_u32() {
        let id = NodeId::from(7);
        assert_eq!(u32::from(id), 7);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn error_code_success_is_distinguishable() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::ENoEnt.is_success());
    }

    #[test_case::test_case(100, true; "minimum minor is in range")]
    #[test_case::test_case(0, false; "minor below the floor is out of range")]
    fn minor_nr_range_check(minor: u32, expect_ok: bool) {
        const MIN_MINOR_NR: u32 = 100;
        assert_eq!(minor >= MIN_MINOR_NR, expect_ok);
    }
}
