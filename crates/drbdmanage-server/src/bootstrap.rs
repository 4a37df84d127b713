//! Node bootstrap: bringing the control volume's replica set itself up to
//! date when a node joins or leaves the cluster.
//!
//! The control volume (the `.drbdctrl` resource) is just another Resource
//! in the domain model, except the server façade manages its Assignment
//! set directly instead of going through `assign`/`unassign`, and every
//! transaction reconciles it immediately rather than waiting for the next
//! scheduled run — other nodes can't learn about a new control-volume
//! replica any other way.

use drbdmanage_model::{Assignment, PropsContainer, VolumeState};
use drbdmanage_reconcile::ChangeNotifier;
use drbdmanage_types::{assg_flags, vlm_state_flags, ErrorCode, NodeId, VolNr};

use crate::facade::ServerFacade;

const CONTROL_RESOURCE: &str = ".drbdctrl";
const CONTROL_VOLUME_NR: u16 = 0;

impl<N: ChangeNotifier> ServerFacade<N> {
    /// First node of a new cluster: creates the control resource's single
    /// Assignment/VolumeState for the local node and brings it up
    /// immediately.
    pub fn init_node(&mut self) -> ErrorCode {
        let node_id = match self.allocate_node_id() {
            Ok(id) => id,
            Err(code) => return code,
        };
        let local = self.local_node_name.clone();
        let code = self.transact(|state| {
            if state.assignments.contains_key(&(local.clone(), CONTROL_RESOURCE.to_string())) {
                return Err(ErrorCode::EExist);
            }
            insert_control_assignment(state, &local, node_id);
            state.poke();
            Ok(())
        });
        if code.is_success() {
            self.reconciler_mut().request_run();
        }
        code
    }

    /// Joining node: adds this node's control-volume Assignment to the
    /// cluster configuration already replicated from an existing member,
    /// then reconciles the control resource alone so every current member
    /// picks up the new replica on its next poll.
    pub fn join_node(&mut self) -> ErrorCode {
        let node_id = match self.allocate_node_id() {
            Ok(id) => id,
            Err(code) => return code,
        };
        let local = self.local_node_name.clone();
        self.transact(|state| {
            if !state.nodes.contains_key(&local) {
                return Err(ErrorCode::ENoEnt);
            }
            if state.assignments.contains_key(&(local.clone(), CONTROL_RESOURCE.to_string())) {
                return Err(ErrorCode::EExist);
            }
            insert_control_assignment(state, &local, node_id);
            state.poke();
            Ok(())
        })
    }

    /// Runs a reconcile pass scoped to the control resource only, used
    /// right after `init_node`/`join_node` and on daemon startup before the
    /// first scheduled full run.
    pub fn reconcile_control_volume(&mut self) -> drbdmanage_reconcile::RunReport {
        self.reconciler.adjust_drbdctrl(&mut self.state)
    }

    /// Re-attaches to every assignment already marked `cstate.DEPLOY` in
    /// the persisted configuration. Called once on daemon startup, before
    /// the first scheduled reconcile pass, so a restart does not treat
    /// already-up volumes as needing a fresh deploy.
    pub fn run_initial_up(&mut self) -> drbdmanage_reconcile::RunReport {
        self.reconciler.initial_up(&mut self.state)
    }
}

fn insert_control_assignment(
    state: &mut drbdmanage_model::ClusterState,
    node_name: &str,
    node_id: NodeId,
) {
    state.assignments.insert(
        (node_name.to_string(), CONTROL_RESOURCE.to_string()),
        Assignment {
            node_name: node_name.to_string(),
            resource_name: CONTROL_RESOURCE.to_string(),
            node_id_in_res: node_id,
            cstate: drbdmanage_types::StateFlags::NONE,
            tstate: drbdmanage_types::StateFlags::NONE
                .set(assg_flags::DEPLOY)
                .set(assg_flags::CONNECT)
                .set(assg_flags::ATTACH),
            props: PropsContainer::new(),
            failure_count: 0,
        },
    );
    state.volume_states.insert(
        (node_name.to_string(), CONTROL_RESOURCE.to_string(), CONTROL_VOLUME_NR),
        VolumeState {
            node_name: node_name.to_string(),
            resource_name: CONTROL_RESOURCE.to_string(),
            vol_nr: VolNr::from(CONTROL_VOLUME_NR),
            blockdevice_path: None,
            cstate: drbdmanage_types::StateFlags::NONE,
            tstate: drbdmanage_types::StateFlags::NONE
                .set(vlm_state_flags::DEPLOY)
                .set(vlm_state_flags::ATTACH),
            props: PropsContainer::new(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::BalancedDeployer;
    use drbdmanage_config::DrbdmanageConfig;
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
    fn init_node_creates_control_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        assert_eq!(facade.init_node(), ErrorCode::Success);
        assert!(facade
            .state()
            .assignments
            .contains_key(&("alpha".to_string(), ".drbdctrl".to_string())));
        assert_eq!(facade.init_node(), ErrorCode::EExist);
    }

    #[test]
    fn join_node_requires_node_to_already_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut facade = facade(&dir);
        assert_eq!(facade.join_node(), ErrorCode::ENoEnt);
    }
}
