//! Just-in-time ID allocation.
//!
//! Allocators are rebuilt from the currently loaded [`ClusterState`] on
//! every call rather than kept as long-lived fields: the reconciler's
//! garbage-collection cascade frees ids by deleting entities in a
//! transaction this façade didn't run, so a cached allocator would drift
//! out of sync with what is actually in use.

use drbdmanage_model::RangeAllocator;
use drbdmanage_reconcile::ChangeNotifier;
use drbdmanage_types::{ErrorCode, MinorNr, NodeId, PortNr, VolNr};

use crate::facade::{ServerFacade, MAX_RES_VOLS};

impl<N: ChangeNotifier> ServerFacade<N> {
    /// Allocates a node id unique across every node's control-resource
    /// assignment.
    pub(crate) fn allocate_node_id(&self) -> Result<NodeId, ErrorCode> {
        let used = self.state.nodes.values().map(|n| u32::from(n.node_id));
        let mut alloc = RangeAllocator::with_used(0, self.config.max_node_id, used);
        alloc.allocate().map(NodeId::from).map_err(|_| ErrorCode::ENodeId)
    }

    /// Allocates a node id unique among the assignments of one resource.
    pub(crate) fn allocate_node_id_in_res(&self, resource_name: &str) -> Result<NodeId, ErrorCode> {
        let used = self
            .state
            .assignments_for_resource(resource_name)
            .map(|a| u32::from(a.node_id_in_res));
        let mut alloc = RangeAllocator::with_used(0, self.config.max_node_id, used);
        alloc.allocate().map(NodeId::from).map_err(|_| ErrorCode::ENodeId)
    }

    pub(crate) fn allocate_port(&self) -> Result<PortNr, ErrorCode> {
        let used = self.state.resources.values().map(|r| u32::from(u16::from(r.port)));
        let mut alloc = RangeAllocator::with_used(
            u32::from(self.config.min_port_nr),
            u32::from(self.config.max_port_nr),
            used,
        );
        alloc
            .allocate()
            .map(|v| PortNr::from(v as u16))
            .map_err(|_| ErrorCode::EPort)
    }

    pub(crate) fn allocate_minor(&self) -> Result<MinorNr, ErrorCode> {
        let used = self.state.volumes.values().map(|v| u32::from(v.minor));
        let mut alloc = RangeAllocator::with_used(self.config.min_minor_nr, MinorNr::MAX, used);
        alloc.allocate().map(MinorNr::from).map_err(|_| ErrorCode::EMinor)
    }

    /// Allocates `count` distinct minors in one pass, so a multi-volume
    /// restore doesn't hand out the same minor twice before any of them
    /// land in `state.volumes`.
    pub(crate) fn allocate_minors(&self, count: usize) -> Result<Vec<MinorNr>, ErrorCode> {
        let used = self.state.volumes.values().map(|v| u32::from(v.minor));
        let mut alloc = RangeAllocator::with_used(self.config.min_minor_nr, MinorNr::MAX, used);
        (0..count)
            .map(|_| alloc.allocate().map(MinorNr::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ErrorCode::EMinor)
    }

    pub(crate) fn allocate_vol_nr(&self, resource_name: &str) -> Result<VolNr, ErrorCode> {
        let used = self
            .state
            .volumes_for_resource(resource_name)
            .map(|v| u32::from(u16::from(v.vol_nr)));
        let mut alloc = RangeAllocator::with_used(0, u32::from(MAX_RES_VOLS), used);
        alloc
            .allocate()
            .map(|v| VolNr::from(v as u16))
            .map_err(|_| ErrorCode::EVolId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::BalancedDeployer;
    use drbdmanage_config::DrbdmanageConfig;
    use drbdmanage_model::{AddressFamily, Node};
    use drbdmanage_reconcile::NullNotifier;
    use drbdmanage_storage::backend::tests::FakeStorageBackend;
    use drbdmanage_types::StateFlags;
    use std::sync::Arc;

    fn facade(dir: &tempfile::TempDir) -> ServerFacade<NullNotifier> {
        ServerFacade::new(
            dir.path().join("drbdctrl.dat"),
            Arc::new(FakeStorageBackend::default()),
            NullNotifier,
            DrbdmanageConfig::default(),
            Box::new(BalancedDeployer),
            "alpha",
        )
        .unwrap()
    }

    #[test]
    fn allocate_node_id_skips_ids_already_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.state.nodes.insert(
            "alpha".to_string(),
            Node {
                name: "alpha".to_string(),
                node_id: NodeId::from(0),
                addr: "10.0.0.1".to_string(),
                af: AddressFamily::Ipv4,
                poolsize_kib: None,
                poolfree_kib: None,
                cstate: StateFlags::NONE,
                tstate: StateFlags::NONE,
                props: Default::default(),
            },
        );
        assert_eq!(facade.allocate_node_id().unwrap(), NodeId::from(1));
    }

    #[test]
    fn allocate_port_stays_within_configured_range() {
        let dir = tempfile::tempdir().unwrap();
        let facade = facade(&dir);
        let port = facade.allocate_port().unwrap();
        assert_eq!(port, PortNr::from(facade.config.min_port_nr));
    }

    #[test]
    fn allocate_vol_nr_fails_once_range_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        for nr in 0..=MAX_RES_VOLS {
            facade.state.volumes.insert(
                ("r0".to_string(), nr),
                drbdmanage_model::Volume {
                    resource_name: "r0".to_string(),
                    vol_nr: VolNr::from(nr),
                    minor: MinorNr::from(100 + u32::from(nr)),
                    size_kib: 1024,
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE,
                    props: Default::default(),
                },
            );
        }
        assert_eq!(facade.allocate_vol_nr("r0"), Err(ErrorCode::EVolId));
    }
}
