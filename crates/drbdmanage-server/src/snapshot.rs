//! Snapshot create/restore/delete.
//!
//! A [`Snapshot`] is a point-in-time marker of a Resource; a
//! [`SnapshotAssignment`] records that one node held that Resource (and at
//! what per-volume size) when the snapshot was taken. Restoring a snapshot
//! creates a brand new Resource/Volume/Assignment set seeded from the
//! recorded sizes, deployed only on the node(s) the snapshot assignment
//! names; the reconciler takes it from there via the storage backend's
//! snapshot-based volume creation path.

use drbdmanage_model::{PropsContainer, Snapshot, SnapshotAssignment, SnapshotVolumeState};
use drbdmanage_reconcile::ChangeNotifier;
use drbdmanage_types::{snapshot_flags, ErrorCode, StateFlags, VolNr};

use crate::facade::ServerFacade;
use crate::validate::validate_name;

impl<N: ChangeNotifier> ServerFacade<N> {
    /// Snapshots `resource_name` as deployed on every node currently
    /// holding a non-diskless assignment of it.
    pub fn create_snapshot(&mut self, resource_name: &str, snapshot_name: &str) -> ErrorCode {
        self.transact(|state| {
            validate_name(snapshot_name)?;
            if !state.resources.contains_key(resource_name) {
                return Err(ErrorCode::ENoEnt);
            }
            let key = (resource_name.to_string(), snapshot_name.to_string());
            if state.snapshots.contains_key(&key) {
                return Err(ErrorCode::EExist);
            }
            state.snapshots.insert(
                key,
                Snapshot {
                    resource_name: resource_name.to_string(),
                    snapshot_name: snapshot_name.to_string(),
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE.set(snapshot_flags::DEPLOY),
                    props: PropsContainer::new(),
                },
            );

            let node_names: Vec<String> = state
                .assignments_for_resource(resource_name)
                .filter(|a| !a.tstate.is_set(drbdmanage_types::assg_flags::DISKLESS))
                .map(|a| a.node_name.clone())
                .collect();
            for node_name in node_names {
                state.snapshot_assignments.insert(
                    (
                        node_name.clone(),
                        resource_name.to_string(),
                        snapshot_name.to_string(),
                    ),
                    SnapshotAssignment {
                        node_name: node_name.clone(),
                        resource_name: resource_name.to_string(),
                        snapshot_name: snapshot_name.to_string(),
                        cstate: StateFlags::NONE,
                        tstate: StateFlags::NONE.set(snapshot_flags::DEPLOY),
                        props: PropsContainer::new(),
                    },
                );
                let vol_nrs: Vec<u16> = state
                    .volumes_for_resource(resource_name)
                    .map(|v| u16::from(v.vol_nr))
                    .collect();
                for vol_nr in vol_nrs {
                    let size_kib = state.volumes[&(resource_name.to_string(), vol_nr)].size_kib;
                    state.snapshot_volume_states.insert(
                        (
                            node_name.clone(),
                            resource_name.to_string(),
                            snapshot_name.to_string(),
                            vol_nr,
                        ),
                        SnapshotVolumeState {
                            node_name: node_name.clone(),
                            resource_name: resource_name.to_string(),
                            snapshot_name: snapshot_name.to_string(),
                            vol_nr: VolNr::from(vol_nr),
                            size_kib,
                            cstate: StateFlags::NONE,
                            tstate: StateFlags::NONE.set(snapshot_flags::DEPLOY),
                        },
                    );
                }
            }
            state.poke();
            Ok(())
        })
    }

    /// Creates a brand new Resource/Volume set from a snapshot's recorded
    /// sizes and deploys it on `target_node`, which need not be a node the
    /// snapshot itself was taken on.
    pub fn restore_snapshot(
        &mut self,
        resource_name: &str,
        snapshot_name: &str,
        new_resource_name: &str,
        target_node: &str,
    ) -> ErrorCode {
        let port = match self.allocate_port() {
            Ok(p) => p,
            Err(code) => return code,
        };
        let secret = crate::mutate::generate_secret();
        let sizes: Vec<(u16, u64)> = self
            .state
            .snapshot_volume_states
            .values()
            .filter(|svs| svs.resource_name == resource_name && svs.snapshot_name == snapshot_name)
            .map(|svs| (u16::from(svs.vol_nr), svs.size_kib))
            .collect();
        if sizes.is_empty() {
            return ErrorCode::ENoEnt;
        }
        let minors = match self.allocate_minors(sizes.len()) {
            Ok(m) => m,
            Err(code) => return code,
        };
        self.transact(|state| {
            validate_name(new_resource_name)?;
            if !state.nodes.contains_key(target_node) {
                return Err(ErrorCode::ENoEnt);
            }
            if state.resources.contains_key(new_resource_name) {
                return Err(ErrorCode::EExist);
            }

            state.resources.insert(
                new_resource_name.to_string(),
                drbdmanage_model::Resource {
                    name: new_resource_name.to_string(),
                    port,
                    secret: secret.clone(),
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE,
                    props: PropsContainer::new(),
                },
            );
            for ((vol_nr, size_kib), minor) in sizes.iter().zip(&minors) {
                state.volumes.insert(
                    (new_resource_name.to_string(), *vol_nr),
                    drbdmanage_model::Volume {
                        resource_name: new_resource_name.to_string(),
                        vol_nr: VolNr::from(*vol_nr),
                        minor: *minor,
                        size_kib: *size_kib,
                        cstate: StateFlags::NONE,
                        tstate: StateFlags::NONE,
                        props: PropsContainer::new(),
                    },
                );
            }

            state.assignments.insert(
                (target_node.to_string(), new_resource_name.to_string()),
                drbdmanage_model::Assignment {
                    node_name: target_node.to_string(),
                    resource_name: new_resource_name.to_string(),
                    node_id_in_res: drbdmanage_types::NodeId::from(0),
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE
                        .set(drbdmanage_types::assg_flags::DEPLOY)
                        .set(drbdmanage_types::assg_flags::CONNECT)
                        .set(drbdmanage_types::assg_flags::ATTACH),
                    props: PropsContainer::new(),
                    failure_count: 0,
                },
            );
            for (vol_nr, _) in &sizes {
                state.volume_states.insert(
                    (target_node.to_string(), new_resource_name.to_string(), *vol_nr),
                    drbdmanage_model::VolumeState {
                        node_name: target_node.to_string(),
                        resource_name: new_resource_name.to_string(),
                        vol_nr: VolNr::from(*vol_nr),
                        blockdevice_path: None,
                        cstate: StateFlags::NONE,
                        tstate: StateFlags::NONE
                            .set(drbdmanage_types::vlm_state_flags::DEPLOY)
                            .set(drbdmanage_types::vlm_state_flags::ATTACH),
                        props: PropsContainer::new(),
                    },
                );
            }
            state.poke();
            Ok(())
        })
    }

    /// Removes the snapshot and every [`SnapshotAssignment`]/
    /// [`SnapshotVolumeState`] recorded under it.
    pub fn delete_snapshot(&mut self, resource_name: &str, snapshot_name: &str) -> ErrorCode {
        self.transact(|state| {
            let key = (resource_name.to_string(), snapshot_name.to_string());
            if state.snapshots.remove(&key).is_none() {
                return Err(ErrorCode::ENoEnt);
            }
            state
                .snapshot_assignments
                .retain(|k, _| !(k.1 == resource_name && k.2 == snapshot_name));
            state
                .snapshot_volume_states
                .retain(|k, _| !(k.1 == resource_name && k.2 == snapshot_name));
            state.poke();
            Ok(())
        })
    }

    pub fn delete_snapshot_assignment(
        &mut self,
        node_name: &str,
        resource_name: &str,
        snapshot_name: &str,
    ) -> ErrorCode {
        self.transact(|state| {
            let key = (
                node_name.to_string(),
                resource_name.to_string(),
                snapshot_name.to_string(),
            );
            if state.snapshot_assignments.remove(&key).is_none() {
                return Err(ErrorCode::ENoEnt);
            }
            state
                .snapshot_volume_states
                .retain(|k, _| !(k.0 == node_name && k.1 == resource_name && k.2 == snapshot_name));
            state.poke();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::BalancedDeployer;
    use drbdmanage_config::DrbdmanageConfig;
    use drbdmanage_model::AddressFamily;
    use drbdmanage_reconcile::NullNotifier;
    use drbdmanage_storage::backend::tests::FakeStorageBackend;
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
    fn create_snapshot_records_every_non_diskless_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.create_volume("r0", 65536, &PropsContainer::new());
        facade.assign("alpha", "r0", &PropsContainer::new());

        assert_eq!(facade.create_snapshot("r0", "snap1"), ErrorCode::Success);
        assert_eq!(facade.list_snapshot_assignments(Some("r0"), Some("snap1")).len(), 1);
    }

    #[test]
    fn restore_snapshot_creates_new_resource_with_recorded_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_node("beta", "10.0.0.2", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.create_volume("r0", 65536, &PropsContainer::new());
        facade.assign("alpha", "r0", &PropsContainer::new());
        facade.create_snapshot("r0", "snap1");

        let code = facade.restore_snapshot("r0", "snap1", "r0-restored", "beta");
        assert_eq!(code, ErrorCode::Success);
        assert_eq!(
            facade.state().volumes[&("r0-restored".to_string(), 0)].size_kib,
            65536
        );
    }

    #[test]
    fn delete_snapshot_removes_its_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.create_volume("r0", 65536, &PropsContainer::new());
        facade.assign("alpha", "r0", &PropsContainer::new());
        facade.create_snapshot("r0", "snap1");

        assert_eq!(facade.delete_snapshot("r0", "snap1"), ErrorCode::Success);
        assert!(facade.list_snapshot_assignments(Some("r0"), Some("snap1")).is_empty());
        assert_eq!(facade.delete_snapshot("r0", "snap1"), ErrorCode::ENoEnt);
    }
}
