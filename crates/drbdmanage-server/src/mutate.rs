//! Node, resource, volume and assignment mutators.

use base64::Engine;
use rand::RngCore;
use drbdmanage_model::{Assignment, Node, PropsContainer, Resource, Volume, VolumeState, AUX_PROP_PREFIX};
use drbdmanage_reconcile::{ChangeNotifier, RESIZE_PENDING_PROP};
use drbdmanage_types::{assg_flags, node_flags, rsc_flags, vlm_flags, vlm_state_flags};
use drbdmanage_types::{ErrorCode, PortNr, StateFlags, VolNr};

use crate::facade::ServerFacade;
use crate::validate::{validate_address, validate_name, validate_size_kib};

/// A client may only inject keys under the `aux/` namespace; anything else
/// is silently dropped before it reaches the domain model.
fn aux_only(props: &PropsContainer) -> PropsContainer {
    props
        .iter()
        .filter(|(k, _)| k.starts_with(AUX_PROP_PREFIX))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl<N: ChangeNotifier> ServerFacade<N> {
    pub fn create_node(
        &mut self,
        name: &str,
        addr: &str,
        af: drbdmanage_model::AddressFamily,
        props: &PropsContainer,
    ) -> ErrorCode {
        let node_id = match self.allocate_node_id() {
            Ok(id) => id,
            Err(code) => return code,
        };
        let bag_patch = aux_only(props);
        self.transact(|state| {
            validate_name(name)?;
            validate_address(addr)?;
            if state.nodes.contains_key(name) {
                return Err(ErrorCode::EExist);
            }
            let mut bag = PropsContainer::new();
            bag.merge(&bag_patch);
            state.nodes.insert(
                name.to_string(),
                Node {
                    name: name.to_string(),
                    node_id,
                    addr: addr.to_string(),
                    af,
                    poolsize_kib: None,
                    poolfree_kib: None,
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE,
                    props: bag,
                },
            );
            state.poke();
            Ok(())
        })
    }

    /// Marks a Node for removal: sets `REMOVE` on the node and flips
    /// `tstate.DEPLOY` off on all of its assignments. Actual deletion
    /// happens in the reconciler's garbage-collection cascade once every
    /// assignment's `cstate.DEPLOY` has followed suit.
    pub fn remove_node(&mut self, name: &str) -> ErrorCode {
        self.transact(|state| {
            let node = state.nodes.get_mut(name).ok_or(ErrorCode::ENoEnt)?;
            node.cstate |= node_flags::REMOVE;
            node.tstate |= node_flags::REMOVE;
            let assignment_keys: Vec<_> = state
                .assignments_for_node(name)
                .map(|a| (a.node_name.clone(), a.resource_name.clone()))
                .collect();
            for key in assignment_keys {
                if let Some(assignment) = state.assignments.get_mut(&key) {
                    assignment.tstate = assignment.tstate.clear(assg_flags::DEPLOY);
                }
            }
            state.poke();
            Ok(())
        })
    }

    pub fn create_resource(&mut self, name: &str, port: Option<u16>, props: &PropsContainer) -> ErrorCode {
        let port = match port {
            Some(p) => PortNr::from(p),
            None => match self.allocate_port() {
                Ok(p) => p,
                Err(code) => return code,
            },
        };
        let secret = generate_secret();
        let bag_patch = aux_only(props);
        self.transact(|state| {
            validate_name(name)?;
            if state.resources.contains_key(name) {
                return Err(ErrorCode::EExist);
            }
            let mut bag = PropsContainer::new();
            bag.merge(&bag_patch);
            state.resources.insert(
                name.to_string(),
                Resource {
                    name: name.to_string(),
                    port,
                    secret,
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE,
                    props: bag,
                },
            );
            state.poke();
            Ok(())
        })
    }

    pub fn remove_resource(&mut self, name: &str) -> ErrorCode {
        self.transact(|state| {
            let resource = state.resources.get_mut(name).ok_or(ErrorCode::ENoEnt)?;
            resource.cstate |= rsc_flags::REMOVE;
            resource.tstate |= rsc_flags::REMOVE;
            let assignment_keys: Vec<_> = state
                .assignments_for_resource(name)
                .map(|a| (a.node_name.clone(), a.resource_name.clone()))
                .collect();
            for key in assignment_keys {
                if let Some(assignment) = state.assignments.get_mut(&key) {
                    assignment.tstate = assignment.tstate.clear(assg_flags::DEPLOY);
                }
            }
            state.poke();
            Ok(())
        })
    }

    /// Validates every key in `props` before applying any of them, then
    /// performs one save outside the validation loop. Flags every
    /// assignment of the resource with `tstate.UPD_CONFIG` so the next
    /// reconcile pass rewrites and re-applies the `.res` file even if no
    /// volume's attach/connect state actually changed.
    pub fn modify_resource(&mut self, name: &str, props: &PropsContainer) -> ErrorCode {
        let aux = aux_only(props);
        self.transact(|state| {
            if !state.resources.contains_key(name) {
                return Err(ErrorCode::ENoEnt);
            }
            for (key, _) in aux.iter() {
                validate_name(key.trim_start_matches(AUX_PROP_PREFIX))?;
            }
            let resource = state.resources.get_mut(name).expect("checked above");
            resource.props.merge(&aux);
            let assignment_keys: Vec<_> = state
                .assignments_for_resource(name)
                .map(|a| (a.node_name.clone(), a.resource_name.clone()))
                .collect();
            for key in assignment_keys {
                if let Some(assignment) = state.assignments.get_mut(&key) {
                    assignment.tstate |= assg_flags::UPD_CONFIG;
                }
            }
            state.poke();
            Ok(())
        })
    }

    pub fn create_volume(
        &mut self,
        resource_name: &str,
        size_kib: u64,
        props: &PropsContainer,
    ) -> ErrorCode {
        let vol_nr = match self.allocate_vol_nr(resource_name) {
            Ok(v) => v,
            Err(code) => return code,
        };
        let minor = match self.allocate_minor() {
            Ok(m) => m,
            Err(code) => return code,
        };
        let bag_patch = aux_only(props);
        self.transact(|state| {
            validate_size_kib(size_kib)?;
            if !state.resources.contains_key(resource_name) {
                return Err(ErrorCode::ENoEnt);
            }
            let mut bag = PropsContainer::new();
            bag.merge(&bag_patch);
            state.volumes.insert(
                (resource_name.to_string(), u16::from(vol_nr)),
                Volume {
                    resource_name: resource_name.to_string(),
                    vol_nr,
                    minor,
                    size_kib,
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE,
                    props: bag,
                },
            );
            state.poke();
            Ok(())
        })
    }

    pub fn modify_volume(&mut self, resource_name: &str, vol_nr: u16, props: &PropsContainer) -> ErrorCode {
        let aux = aux_only(props);
        self.transact(|state| {
            let volume = state
                .volumes
                .get_mut(&(resource_name.to_string(), vol_nr))
                .ok_or(ErrorCode::ENoEnt)?;
            volume.props.merge(&aux);
            state.poke();
            Ok(())
        })
    }

    /// Grows a volume's size. Shrinking is rejected outright, per the
    /// design note that `resize_volume` should be a real operation rather
    /// than an `ENOTIMPL` stub. Every attached VolumeState is tagged so the
    /// next reconcile pass extends the backing device and issues
    /// `drbdsetup resize`.
    pub fn resize_volume(&mut self, resource_name: &str, vol_nr: u16, new_size_kib: u64) -> ErrorCode {
        self.transact(|state| {
            validate_size_kib(new_size_kib)?;
            let key = (resource_name.to_string(), vol_nr);
            let current_size = state.volumes.get(&key).ok_or(ErrorCode::ENoEnt)?.size_kib;
            if new_size_kib < current_size {
                return Err(ErrorCode::EVolSz);
            }
            state.volumes.get_mut(&key).expect("checked above").size_kib = new_size_kib;
            for vs in state.volume_states.values_mut() {
                if vs.resource_name == resource_name
                    && u16::from(vs.vol_nr) == vol_nr
                    && vs.cstate.is_set(vlm_state_flags::ATTACH)
                {
                    vs.props.set(RESIZE_PENDING_PROP, "1");
                }
            }
            state.poke();
            Ok(())
        })
    }

    pub fn remove_volume(&mut self, resource_name: &str, vol_nr: u16) -> ErrorCode {
        self.transact(|state| {
            let volume = state
                .volumes
                .get_mut(&(resource_name.to_string(), vol_nr))
                .ok_or(ErrorCode::ENoEnt)?;
            volume.cstate |= vlm_flags::REMOVE;
            volume.tstate |= vlm_flags::REMOVE;
            volume.tstate = volume.tstate.clear(vlm_flags::DEPLOY);
            for vs in state.volume_states.values_mut() {
                if vs.resource_name == resource_name && u16::from(vs.vol_nr) == vol_nr {
                    vs.tstate = vs.tstate.clear(vlm_state_flags::DEPLOY);
                }
            }
            state.poke();
            Ok(())
        })
    }

    /// Deploys `resource_name` onto `node_name`: creates a full-replica
    /// Assignment with `tstate.DEPLOY=CONNECT=ATTACH=1` and a VolumeState
    /// per Volume of the resource with `tstate.DEPLOY=ATTACH=1`.
    pub fn assign(&mut self, node_name: &str, resource_name: &str, props: &PropsContainer) -> ErrorCode {
        let node_id_in_res = match self.allocate_node_id_in_res(resource_name) {
            Ok(id) => id,
            Err(code) => return code,
        };
        let bag_patch = aux_only(props);
        self.transact(|state| {
            if !state.nodes.contains_key(node_name) {
                return Err(ErrorCode::ENoEnt);
            }
            if !state.resources.contains_key(resource_name) {
                return Err(ErrorCode::ENoEnt);
            }
            let key = (node_name.to_string(), resource_name.to_string());
            if state.assignments.contains_key(&key) {
                return Err(ErrorCode::EExist);
            }
            let mut bag = PropsContainer::new();
            bag.merge(&bag_patch);
            state.assignments.insert(
                key,
                Assignment {
                    node_name: node_name.to_string(),
                    resource_name: resource_name.to_string(),
                    node_id_in_res,
                    cstate: StateFlags::NONE,
                    tstate: StateFlags::NONE
                        .set(assg_flags::DEPLOY)
                        .set(assg_flags::CONNECT)
                        .set(assg_flags::ATTACH),
                    props: bag,
                    failure_count: 0,
                },
            );
            let vol_nrs: Vec<u16> = state
                .volumes_for_resource(resource_name)
                .map(|v| u16::from(v.vol_nr))
                .collect();
            for vol_nr in vol_nrs {
                state.volume_states.insert(
                    (node_name.to_string(), resource_name.to_string(), vol_nr),
                    VolumeState {
                        node_name: node_name.to_string(),
                        resource_name: resource_name.to_string(),
                        vol_nr: VolNr::from(vol_nr),
                        blockdevice_path: None,
                        cstate: StateFlags::NONE,
                        tstate: StateFlags::NONE
                            .set(vlm_state_flags::DEPLOY)
                            .set(vlm_state_flags::ATTACH),
                        props: PropsContainer::new(),
                    },
                );
            }
            state.poke();
            Ok(())
        })
    }

    /// Clears `tstate.DEPLOY` on the Assignment; the reconciler drives
    /// `cstate.DEPLOY` to 0 and the Assignment is garbage-collected once it
    /// does. `force` additionally clears `cstate.DEPLOY` immediately,
    /// skipping the storage/admin-tool teardown (for an unreachable node).
    pub fn unassign(&mut self, node_name: &str, resource_name: &str, force: bool) -> ErrorCode {
        self.transact(|state| {
            let key = (node_name.to_string(), resource_name.to_string());
            let assignment = state.assignments.get_mut(&key).ok_or(ErrorCode::ENoEnt)?;
            assignment.tstate = assignment.tstate.clear(assg_flags::DEPLOY);
            if force {
                assignment.cstate = assignment.cstate.clear(assg_flags::DEPLOY);
            }
            for vs in state.volume_states.values_mut() {
                if vs.node_name == node_name && vs.resource_name == resource_name {
                    vs.tstate = vs.tstate.clear(vlm_state_flags::DEPLOY);
                    if force {
                        vs.cstate = vs.cstate.clear(vlm_state_flags::DEPLOY);
                    }
                }
            }
            state.poke();
            Ok(())
        })
    }

    /// Generic mask-pair mutator for an Assignment's `cstate`/`tstate`.
    /// Setting `tstate.OVERWRITE` implicitly clears `tstate.DISCARD` on
    /// this assignment (and the reverse — the two are mutually exclusive)
    /// and clears `OVERWRITE` on every peer Assignment of the same
    /// Resource, enforcing the cluster-wide at-most-one invariant the
    /// domain model itself does not.
    pub fn modify_assignment(
        &mut self,
        node_name: &str,
        resource_name: &str,
        cstate_clear: StateFlags,
        cstate_set: StateFlags,
        tstate_clear: StateFlags,
        tstate_set: StateFlags,
    ) -> ErrorCode {
        self.transact(|state| {
            let key = (node_name.to_string(), resource_name.to_string());
            if !state.assignments.contains_key(&key) {
                return Err(ErrorCode::ENoEnt);
            }

            let mut tstate_clear = tstate_clear;
            let mut tstate_set = tstate_set;
            if tstate_set.is_set(assg_flags::OVERWRITE) {
                tstate_clear |= assg_flags::DISCARD;
                tstate_set = tstate_set.clear(assg_flags::DISCARD);
            } else if tstate_set.is_set(assg_flags::DISCARD) {
                tstate_clear |= assg_flags::OVERWRITE;
            }

            let assignment = state.assignments.get_mut(&key).expect("checked above");
            assignment.cstate = assignment.cstate.clear(cstate_clear).set(cstate_set);
            assignment.tstate = assignment.tstate.clear(tstate_clear).set(tstate_set);

            if tstate_set.is_set(assg_flags::OVERWRITE) {
                let peer_keys: Vec<_> = state
                    .assignments_for_resource(resource_name)
                    .filter(|a| a.node_name != node_name)
                    .map(|a| (a.node_name.clone(), a.resource_name.clone()))
                    .collect();
                for peer_key in peer_keys {
                    let peer = state.assignments.get_mut(&peer_key).expect("listed above");
                    peer.tstate = peer.tstate.clear(assg_flags::OVERWRITE);
                }
            }

            state.poke();
            Ok(())
        })
    }

    /// Sets `tstate.OVERWRITE` via [`modify_assignment`](Self::modify_assignment).
    /// `OVERWRITE` and `DISKLESS` are mutually exclusive, so a diskless
    /// client rejects this up front rather than via the generic mask pair.
    pub fn set_overwrite(&mut self, node_name: &str, resource_name: &str) -> ErrorCode {
        let key = (node_name.to_string(), resource_name.to_string());
        let diskless = self
            .state
            .assignments
            .get(&key)
            .map(|a| a.tstate.is_set(assg_flags::DISKLESS))
            .unwrap_or(false);
        if diskless {
            return ErrorCode::EInval;
        }
        self.modify_assignment(
            node_name,
            resource_name,
            StateFlags::NONE,
            StateFlags::NONE,
            StateFlags::NONE,
            assg_flags::OVERWRITE,
        )
    }

    /// Clears the failure counter so the next trigger retries immediately
    /// instead of waiting for the current back-off to elapse.
    pub fn resume(&mut self, node_name: &str, resource_name: &str) -> ErrorCode {
        self.transact(|state| {
            let key = (node_name.to_string(), resource_name.to_string());
            let assignment = state.assignments.get_mut(&key).ok_or(ErrorCode::ENoEnt)?;
            assignment.failure_count = 0;
            state.poke();
            Ok(())
        })
    }

    /// Bumps the cluster serial without otherwise touching any entity,
    /// forcing every peer to observe a hash change and re-reconcile.
    pub fn poke(&mut self) -> ErrorCode {
        self.transact(|state| {
            state.poke();
            Ok(())
        })
    }

    /// Refreshes `poolsize_kiB`/`poolfree_kiB` for one node (or every node
    /// if `node_name` is `None`) via the storage backend.
    pub fn update_pool(&mut self, node_name: Option<&str>) -> ErrorCode {
        let stats = match self.storage.update_pool() {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(%err, "update_pool: storage backend call failed");
                return ErrorCode::EStorage;
            }
        };
        self.transact(|state| {
            let names: Vec<String> = match node_name {
                Some(n) => vec![n.to_string()],
                None => state.nodes.keys().cloned().collect(),
            };
            for name in &names {
                let node = state.nodes.get_mut(name).ok_or(ErrorCode::ENoEnt)?;
                node.poolsize_kib = Some(stats.poolsize_kib);
                node.poolfree_kib = Some(stats.poolfree_kib);
            }
            state.poke();
            Ok(())
        })
    }

    /// The maximum net volume size deployable at `redundancy` replicas,
    /// derived from the `redundancy`-th largest `poolfree_kiB` among nodes
    /// with a known pool state, minus the configured `max_peers`' worth of
    /// bitmap overhead.
    pub fn cluster_free_query(&self, redundancy: usize) -> Result<u64, ErrorCode> {
        let mut known: Vec<u64> = self
            .state
            .nodes
            .values()
            .filter_map(|n| n.poolfree_kib)
            .collect();
        known.sort_unstable_by(|a, b| b.cmp(a));
        let slot = known
            .get(redundancy.saturating_sub(1))
            .copied()
            .ok_or(ErrorCode::ENodeCnt)?;
        Ok(slot.saturating_sub(PER_PEER_BITMAP_OVERHEAD_KIB * u64::from(self.config.max_peers)))
    }
}

/// Per-peer bitmap overhead subtracted from gross pool-free space when
/// computing a deployable net volume size.
const PER_PEER_BITMAP_OVERHEAD_KIB: u64 = 4;

/// Generates an opaque base64 shared secret for a newly created resource.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
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
    fn aux_only_drops_non_aux_keys() {
        let mut props = PropsContainer::new();
        props.set("aux/owner", "alice");
        props.set("max-node-id", "99");
        let filtered = aux_only(&props);
        assert_eq!(filtered.get("aux/owner"), Some("alice"));
        assert_eq!(filtered.get("max-node-id"), None);
    }

    #[test]
    fn create_node_then_create_resource_then_assign() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);

        let code = facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        assert_eq!(code, ErrorCode::Success);

        let code = facade.create_resource("r0", None, &PropsContainer::new());
        assert_eq!(code, ErrorCode::Success);
        let port = u16::from(facade.state().resources["r0"].port);
        assert!((facade.config().min_port_nr..=facade.config().max_port_nr).contains(&port));

        let code = facade.create_volume("r0", 65536, &PropsContainer::new());
        assert_eq!(code, ErrorCode::Success);

        let code = facade.assign("alpha", "r0", &PropsContainer::new());
        assert_eq!(code, ErrorCode::Success);

        let assignment = &facade.state().assignments[&("alpha".to_string(), "r0".to_string())];
        assert!(assignment.tstate.is_set(assg_flags::DEPLOY));
        assert!(assignment.tstate.is_set(assg_flags::CONNECT));
        assert!(!assignment.cstate.is_set(assg_flags::DEPLOY));
    }

    #[test]
    fn create_resource_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        assert_eq!(
            facade.create_resource("r0", None, &PropsContainer::new()),
            ErrorCode::Success
        );
        assert_eq!(
            facade.create_resource("r0", None, &PropsContainer::new()),
            ErrorCode::EExist
        );
    }

    #[test]
    fn resize_volume_rejects_shrink() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.create_volume("r0", 65536, &PropsContainer::new());
        let code = facade.resize_volume("r0", 0, 1024);
        assert_eq!(code, ErrorCode::EVolSz);
        let code = facade.resize_volume("r0", 0, 131072);
        assert_eq!(code, ErrorCode::Success);
    }

    #[test]
    fn set_overwrite_is_exclusive_among_peers() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_node("beta", "10.0.0.2", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.assign("alpha", "r0", &PropsContainer::new());
        facade.assign("beta", "r0", &PropsContainer::new());

        assert_eq!(facade.set_overwrite("alpha", "r0"), ErrorCode::Success);
        assert!(facade.state().assignments[&("alpha".to_string(), "r0".to_string())]
            .tstate
            .is_set(assg_flags::OVERWRITE));

        assert_eq!(facade.set_overwrite("beta", "r0"), ErrorCode::Success);
        assert!(!facade.state().assignments[&("alpha".to_string(), "r0".to_string())]
            .tstate
            .is_set(assg_flags::OVERWRITE));
        assert!(facade.state().assignments[&("beta".to_string(), "r0".to_string())]
            .tstate
            .is_set(assg_flags::OVERWRITE));
    }
}
