//! Automatic placement.
//!
//! `auto_deploy` scales a resource's assignment count up or down to a
//! target (given directly via `count` or relative to the current count via
//! `delta`), optionally turning every node without a full replica into a
//! diskless client (`site_clients`). `auto_undeploy` removes a resource
//! from every node outright, which is a distinct operation from a reduce:
//! `auto_deploy` with a lower count keeps the resource around as a client
//! on the nodes it drops, while `auto_undeploy` tears it down everywhere.

use std::collections::HashSet;

use drbdmanage_model::{ClusterState, Node, PropsContainer, VolumeState};
use drbdmanage_reconcile::ChangeNotifier;
use drbdmanage_types::{assg_flags, vlm_state_flags, ErrorCode, NodeId, VolNr};

use crate::facade::ServerFacade;

impl<N: ChangeNotifier> ServerFacade<N> {
    /// Deploys, or reduces the deployment of, `resource_name` until it is
    /// assigned to `count` nodes, or until the assignment count has
    /// changed by `delta` — exactly one of the two must be non-zero.
    /// Reducing drops the excess assignments down to `DISKLESS` clients
    /// when `site_clients` is set, otherwise unassigns them outright. If
    /// `site_clients` is set, every node left without a full replica
    /// (including ones untouched by this call) ends up attached as a
    /// client.
    pub fn auto_deploy(
        &mut self,
        resource_name: &str,
        count: i64,
        delta: i64,
        site_clients: bool,
    ) -> Result<usize, ErrorCode> {
        if (count != 0 && delta != 0) || count < 0 {
            return Err(ErrorCode::EInval);
        }
        if !self.state.resources.contains_key(resource_name) {
            return Err(ErrorCode::ENoEnt);
        }

        let assigned_count = self.state.assignments_for_resource(resource_name).count() as i64;
        let final_count = if delta != 0 { assigned_count + delta } else { count };
        if final_count <= 0 {
            return Err(ErrorCode::EInval);
        }
        let max_count = i64::from(self.config.max_node_id + 1).min(self.state.nodes.len() as i64);
        if final_count > max_count {
            return Err(ErrorCode::ENodeCnt);
        }

        let mut changed = 0usize;
        if final_count > assigned_count {
            changed = self.auto_deploy_extend(resource_name, (final_count - assigned_count) as usize)?;
        } else if final_count < assigned_count {
            changed = self.auto_deploy_reduce(
                resource_name,
                (assigned_count - final_count) as usize,
                site_clients,
            )?;
        }

        if site_clients {
            let code = self.apply_site_clients(resource_name);
            if code != ErrorCode::Success {
                return Err(code);
            }
        }
        Ok(changed)
    }

    fn auto_deploy_extend(&mut self, resource_name: &str, wanted: usize) -> Result<usize, ErrorCode> {
        let already: HashSet<String> = self
            .state
            .assignments_for_resource(resource_name)
            .map(|a| a.node_name.clone())
            .collect();
        let candidates: Vec<&Node> = self
            .state
            .nodes
            .values()
            .filter(|n| !already.contains(&n.name))
            .collect();
        let picked = self.deployer.select_nodes(&candidates, wanted);
        if picked.len() < wanted {
            return Err(ErrorCode::ENodeCnt);
        }
        for node_name in &picked {
            let code = self.assign(node_name, resource_name, &PropsContainer::new());
            if code != ErrorCode::Success {
                return Err(code);
            }
        }
        Ok(picked.len())
    }

    fn auto_deploy_reduce(
        &mut self,
        resource_name: &str,
        diff: usize,
        site_clients: bool,
    ) -> Result<usize, ErrorCode> {
        let mut full: Vec<(String, u32)> = self
            .state
            .assignments_for_resource(resource_name)
            .filter(|a| !a.tstate.is_set(assg_flags::DISKLESS))
            .map(|a| (a.node_name.clone(), a.failure_count))
            .collect();
        full.sort_by_key(|(_, failures)| std::cmp::Reverse(*failures));
        let selected: Vec<String> = full.into_iter().take(diff).map(|(n, _)| n).collect();
        let demoted = selected.len();

        let code = self.transact(|state| {
            for node_name in &selected {
                let key = (node_name.clone(), resource_name.to_string());
                let assignment = state.assignments.get_mut(&key).ok_or(ErrorCode::ENoEnt)?;
                if site_clients {
                    assignment.tstate = assignment
                        .tstate
                        .set(assg_flags::DISKLESS)
                        .clear(assg_flags::OVERWRITE)
                        .clear(assg_flags::ATTACH);
                } else {
                    assignment.tstate = assignment.tstate.clear(assg_flags::DEPLOY);
                }
                for vs in state.volume_states.values_mut() {
                    if vs.node_name == *node_name && vs.resource_name == *resource_name {
                        if site_clients {
                            vs.tstate = vs.tstate.clear(vlm_state_flags::ATTACH);
                        } else {
                            vs.tstate = vs.tstate.clear(vlm_state_flags::DEPLOY);
                        }
                    }
                }
            }
            state.poke();
            Ok(())
        });
        if code != ErrorCode::Success {
            return Err(code);
        }
        Ok(demoted)
    }

    /// Turns every node not already a full replica of `resource_name` into
    /// a `DISKLESS` client: creates a fresh client assignment for nodes
    /// with none, and demotes any assignment whose `tstate.DEPLOY` is
    /// unset (already on its way out) into one instead of leaving it to be
    /// garbage-collected.
    fn apply_site_clients(&mut self, resource_name: &str) -> ErrorCode {
        let max_node_id = self.config.max_node_id;
        let node_names: Vec<String> = self.state.nodes.keys().cloned().collect();
        self.transact(|state| {
            for node_name in &node_names {
                let key = (node_name.clone(), resource_name.to_string());
                match state.assignments.get_mut(&key) {
                    Some(assignment) => {
                        if !assignment.tstate.is_set(assg_flags::DEPLOY) {
                            assignment.tstate = assignment
                                .tstate
                                .set(assg_flags::DEPLOY)
                                .set(assg_flags::CONNECT)
                                .set(assg_flags::DISKLESS)
                                .clear(assg_flags::ATTACH);
                        }
                    }
                    None => {
                        let Some(node_id) = next_free_node_id(state, resource_name, max_node_id) else {
                            return Err(ErrorCode::ENodeId);
                        };
                        insert_client_assignment(state, node_name, resource_name, node_id);
                    }
                }
            }
            state.poke();
            Ok(())
        })
    }

    /// Removes `resource_name` from every node it is assigned to. A
    /// not-yet-deployed assignment (`cstate.DEPLOY` unset) is dropped
    /// immediately; an already-deployed one is torn down through the
    /// normal reconcile path unless `force` skips straight to dropping it,
    /// for a node that can no longer be reached to confirm teardown.
    pub fn auto_undeploy(&mut self, resource_name: &str, force: bool) -> Result<usize, ErrorCode> {
        if !self.state.resources.contains_key(resource_name) {
            return Err(ErrorCode::ENoEnt);
        }
        let keys: Vec<(String, String)> = self
            .state
            .assignments_for_resource(resource_name)
            .map(|a| (a.node_name.clone(), a.resource_name.clone()))
            .collect();
        let count = keys.len();

        let code = self.transact(|state| {
            for key in &keys {
                let deployed = state
                    .assignments
                    .get(key)
                    .is_some_and(|a| a.cstate.is_set(assg_flags::DEPLOY));
                if !force && deployed {
                    if let Some(assignment) = state.assignments.get_mut(key) {
                        assignment.tstate =
                            assignment.tstate.clear(assg_flags::DEPLOY | assg_flags::CONNECT);
                    }
                    for vs in state.volume_states.values_mut() {
                        if vs.node_name == key.0 && vs.resource_name == key.1 {
                            vs.tstate =
                                vs.tstate.clear(vlm_state_flags::DEPLOY | vlm_state_flags::ATTACH);
                        }
                    }
                } else {
                    state.assignments.remove(key);
                    state
                        .volume_states
                        .retain(|k, _| !(k.0 == key.0 && k.1 == key.1));
                }
            }
            state.poke();
            Ok(())
        });
        if code != ErrorCode::Success {
            return Err(code);
        }
        Ok(count)
    }
}

fn next_free_node_id(
    state: &ClusterState,
    resource_name: &str,
    max_node_id: u32,
) -> Option<NodeId> {
    let used: HashSet<u32> = state
        .assignments_for_resource(resource_name)
        .map(|a| u32::from(a.node_id_in_res))
        .collect();
    (0..=max_node_id).find(|id| !used.contains(id)).map(NodeId::from)
}

fn insert_client_assignment(
    state: &mut ClusterState,
    node_name: &str,
    resource_name: &str,
    node_id: NodeId,
) {
    let vol_nrs: Vec<u16> = state
        .volumes_for_resource(resource_name)
        .map(|v| u16::from(v.vol_nr))
        .collect();
    state.assignments.insert(
        (node_name.to_string(), resource_name.to_string()),
        drbdmanage_model::Assignment {
            node_name: node_name.to_string(),
            resource_name: resource_name.to_string(),
            node_id_in_res: node_id,
            cstate: drbdmanage_types::StateFlags::NONE,
            tstate: drbdmanage_types::StateFlags::NONE
                .set(assg_flags::DEPLOY)
                .set(assg_flags::CONNECT)
                .set(assg_flags::DISKLESS),
            props: PropsContainer::new(),
            failure_count: 0,
        },
    );
    for vol_nr in vol_nrs {
        state.volume_states.insert(
            (node_name.to_string(), resource_name.to_string(), vol_nr),
            VolumeState {
                node_name: node_name.to_string(),
                resource_name: resource_name.to_string(),
                vol_nr: VolNr::from(vol_nr),
                blockdevice_path: None,
                cstate: drbdmanage_types::StateFlags::NONE,
                tstate: drbdmanage_types::StateFlags::NONE.set(vlm_state_flags::DEPLOY),
                props: PropsContainer::new(),
            },
        );
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
    fn auto_deploy_extends_to_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        for name in ["alpha", "beta", "gamma"] {
            facade.create_node(name, "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        }
        facade.create_resource("r0", None, &PropsContainer::new());

        let placed = facade.auto_deploy("r0", 2, 0, false).unwrap();
        assert_eq!(placed, 2);
        assert_eq!(facade.list_assignments(None, Some("r0"), &PropsContainer::new(), None).len(), 2);
    }

    #[test]
    fn auto_deploy_rejects_conflicting_count_and_delta() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_resource("r0", None, &PropsContainer::new());
        assert_eq!(facade.auto_deploy("r0", 1, 1, false), Err(ErrorCode::EInval));
    }

    #[test]
    fn auto_deploy_reduce_demotes_excess_to_diskless_with_site_clients() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        for name in ["alpha", "beta", "gamma"] {
            facade.create_node(name, "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        }
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.auto_deploy("r0", 3, 0, false).unwrap();

        facade.auto_deploy("r0", 1, 0, true).unwrap();
        let diskless_count = facade
            .list_assignments(None, Some("r0"), &PropsContainer::new(), None)
            .iter()
            .filter(|a| a.tstate.is_set(assg_flags::DISKLESS))
            .count();
        assert_eq!(diskless_count, 2);
        assert_eq!(facade.list_assignments(None, Some("r0"), &PropsContainer::new(), None).len(), 3);
    }

    #[test]
    fn auto_undeploy_removes_every_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        for name in ["alpha", "beta"] {
            facade.create_node(name, "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        }
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.auto_deploy("r0", 2, 0, false).unwrap();

        let removed = facade.auto_undeploy("r0", true).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(facade.list_assignments(None, Some("r0"), &PropsContainer::new(), None).len(), 0);
    }

    #[test]
    fn auto_undeploy_without_force_schedules_teardown_not_immediate_removal() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        facade.create_node("alpha", "10.0.0.1", AddressFamily::Ipv4, &PropsContainer::new());
        facade.create_resource("r0", None, &PropsContainer::new());
        facade.auto_deploy("r0", 1, 0, false).unwrap();

        let affected = facade.auto_undeploy("r0", false).unwrap();
        assert_eq!(affected, 1);
        // not yet cstate.DEPLOY, so the no-force path drops it immediately too
        assert_eq!(facade.list_assignments(None, Some("r0"), &PropsContainer::new(), None).len(), 0);
    }
}
