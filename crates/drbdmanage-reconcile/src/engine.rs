//! The reconciliation engine.
//!
//! Drives every [`Assignment`]'s `cstate` toward its `tstate` by calling out
//! to the storage backend and the DRBD admin interface, then runs
//! the garbage-collection cascade. A storage or admin-tool failure on one
//! assignment is recorded in the returned [`RunReport`] and does not abort
//! the run; only an unexpected internal error (failing to hash the cluster
//! state) does.

use std::path::PathBuf;
use std::sync::Arc;

use drbdmanage_drbdadm::{render_resource_config, DrbdAdm, NodeView};
use drbdmanage_io::{IoBackend, SyncBackend};
use drbdmanage_model::{AssignmentKey, ClusterState};
use drbdmanage_persistence::{hash_bytes, ConfigHash};
use drbdmanage_storage::StorageBackend;
use drbdmanage_types::{assg_flags, node_flags, rsc_flags, vlm_flags, vlm_state_flags, VolNr};

use crate::notifier::ChangeNotifier;
use crate::report::RunReport;
use crate::ReconcileError;

/// VolumeState property key `resize_volume` sets to ask the next case-4
/// pass to extend the backing device and run `drbdsetup resize`.
pub const RESIZE_PENDING_PROP: &str = "internal/resize-pending";

/// Owns the collaborators the reconciler drives and the bookkeeping it
/// needs across runs (the remembered hash for `run`'s skip-if-unchanged
/// check, and the coalesced-followup flag).
pub struct Reconciler<N: ChangeNotifier> {
    storage: Arc<dyn StorageBackend>,
    drbdadm: DrbdAdm,
    notifier: N,
    control_resource_name: String,
    conf_dir: PathBuf,
    io: SyncBackend,
    last_hash: Option<ConfigHash>,
    dirty: bool,
}

impl<N: ChangeNotifier> Reconciler<N> {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        drbdadm: DrbdAdm,
        notifier: N,
        control_resource_name: impl Into<String>,
        conf_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            drbdadm,
            notifier,
            control_resource_name: control_resource_name.into(),
            conf_dir: conf_dir.into(),
            io: SyncBackend::new(),
            last_hash: None,
            dirty: false,
        }
    }

    /// Records that an event trigger arrived. The event loop should call
    /// [`take_pending`](Self::take_pending) once per tick and run a
    /// reconcile pass if it returns `true` — any number of triggers that
    /// arrive before that check collapse into a single follow-up run.
    pub fn request_run(&mut self) {
        self.dirty = true;
    }

    pub fn take_pending(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// On boot: bring up every assignment whose `cstate.DEPLOY` is already
    /// set in the persisted configuration (before any `tstate` comparison
    /// happens), so a restarted daemon re-attaches to volumes it previously
    /// believed were up.
    pub fn initial_up(&mut self, cluster: &mut ClusterState) -> RunReport {
        let mut report = RunReport::default();
        let resource_names: Vec<String> = cluster
            .assignments
            .values()
            .filter(|a| a.cstate.is_set(assg_flags::DEPLOY))
            .map(|a| a.resource_name.clone())
            .collect();

        for resource_name in resource_names {
            if let Err(err) = self.rewrite_config(cluster, &resource_name) {
                tracing::warn!(%resource_name, %err, "initial_up: failed to render config");
                continue;
            }
            if let Err(err) = self.drbdadm.up(&resource_name) {
                tracing::warn!(%resource_name, %err, "initial_up: drbdadm up failed");
                report.record_failed(
                    &(resource_name.clone(), resource_name),
                    err.to_string(),
                );
            }
        }
        report
    }

    /// Reconciles the control resource only.
    pub fn adjust_drbdctrl(&mut self, cluster: &mut ClusterState) -> RunReport {
        let name = self.control_resource_name.clone();
        self.reconcile_resource(cluster, &name)
    }

    /// Reconciles every resource except the control resource.
    pub fn perform_changes(&mut self, cluster: &mut ClusterState) -> RunReport {
        let control = self.control_resource_name.clone();
        let mut report = RunReport::default();
        let names: Vec<String> = cluster
            .resources
            .keys()
            .filter(|name| **name != control)
            .cloned()
            .collect();
        for name in names {
            report.merge(self.reconcile_resource(cluster, &name));
        }
        self.gc(cluster, &mut report);
        report
    }

    /// Top-level entry used by the event pipeline. Skips the run entirely
    /// when nothing has changed since the last run, unless `override_hash`
    /// forces it. `bump_serial` pokes the cluster serial first, forcing a
    /// hash change and therefore a run even if no entity differs.
    pub fn run(
        &mut self,
        cluster: &mut ClusterState,
        override_hash: bool,
        bump_serial: bool,
    ) -> Result<RunReport, ReconcileError> {
        if bump_serial {
            cluster.poke();
        }
        let bytes = postcard::to_allocvec(cluster)?;
        let hash = hash_bytes(&bytes);
        if !override_hash && self.last_hash == Some(hash) {
            return Ok(RunReport::default());
        }
        self.last_hash = Some(hash);

        let mut report = self.adjust_drbdctrl(cluster);
        report.merge(self.perform_changes(cluster));
        Ok(report)
    }

    fn reconcile_resource(&mut self, cluster: &mut ClusterState, resource_name: &str) -> RunReport {
        let mut report = RunReport::default();
        if !cluster.resources.contains_key(resource_name) {
            return report;
        }

        let keys: Vec<AssignmentKey> = cluster
            .assignments_for_resource(resource_name)
            .map(|a| (a.node_name.clone(), a.resource_name.clone()))
            .collect();

        // Deploys and steady-state reconcile first, so re-keyed ids never
        // collide with an id freed by a delete processed in the same run.
        let mut topology_changed = false;
        for key in &keys {
            let assignment = cluster.assignments[key].clone();
            if assignment.tstate.is_set(assg_flags::DEPLOY) {
                match self.reconcile_deployed(cluster, key) {
                    Ok(changed) => {
                        topology_changed |= changed;
                        report.record_ok(key);
                        self.notifier
                            .notify_changed(&format!("/resources/{resource_name}/{}", key.0));
                    }
                    Err(reason) => {
                        self.bump_failure_count(cluster, key);
                        report.record_failed(key, reason);
                    }
                }
            }
            if cluster.assignments[key].tstate.is_set(assg_flags::UPD_CONFIG) {
                topology_changed = true;
            }
        }

        if topology_changed {
            let force = keys
                .iter()
                .any(|k| cluster.assignments[k].tstate.is_set(assg_flags::OVERWRITE));
            if let Err(err) = self.rewrite_config(cluster, resource_name) {
                tracing::warn!(%resource_name, %err, "failed to rewrite resource config");
            } else if let Err(err) = self.drbdadm.adjust(resource_name, force) {
                tracing::warn!(%resource_name, %err, "drbdadm adjust failed");
            } else {
                for key in &keys {
                    if let Some(assignment) = cluster.assignments.get_mut(key) {
                        if assignment.tstate.is_set(assg_flags::UPD_CONFIG) {
                            assignment.tstate = assignment.tstate.clear(assg_flags::UPD_CONFIG);
                            assignment.cstate = assignment.cstate.clear(assg_flags::UPD_CONFIG);
                        }
                    }
                }
            }
        }

        // Deletes only after every deploy above has been attempted.
        for key in &keys {
            let assignment = cluster.assignments[key].clone();
            if !assignment.tstate.is_set(assg_flags::DEPLOY) && assignment.cstate.is_set(assg_flags::DEPLOY)
            {
                match self.undeploy(cluster, resource_name, key) {
                    Ok(()) => {
                        report.record_ok(key);
                        self.notifier
                            .notify_changed(&format!("/resources/{resource_name}/{}", key.0));
                    }
                    Err(reason) => {
                        self.bump_failure_count(cluster, key);
                        report.record_failed(key, reason);
                    }
                }
            }
        }

        report
    }

    /// Case 2 (not yet deployed) and case 4 (already deployed, steady-state
    /// attach/connect reconcile). Returns whether the resource's `.res`
    /// file needs to be rewritten and re-applied.
    fn reconcile_deployed(
        &mut self,
        cluster: &mut ClusterState,
        key: &AssignmentKey,
    ) -> Result<bool, String> {
        let was_deployed = cluster.assignments[key].cstate.is_set(assg_flags::DEPLOY);

        if !was_deployed {
            // Case 2: allocate backing storage for every volume state that
            // wants to be deployed, before touching drbdadm at all.
            let vol_keys: Vec<_> = cluster
                .volume_states_for_assignment(&key.0, &key.1)
                .filter(|vs| vs.tstate.is_set(vlm_state_flags::DEPLOY))
                .map(|vs| (vs.node_name.clone(), vs.resource_name.clone(), u16::from(vs.vol_nr)))
                .collect();

            for vs_key in &vol_keys {
                let vol_nr = vs_key.2;
                let size_kib = cluster
                    .volumes
                    .get(&(key.1.clone(), vol_nr))
                    .map(|v| v.size_kib)
                    .unwrap_or(0);
                let path = self
                    .storage
                    .create_volume(&key.1, VolNr::from(vol_nr), size_kib)
                    .map_err(|e| e.to_string())?;
                if let Some(vs) = cluster.volume_states.get_mut(vs_key) {
                    vs.blockdevice_path = Some(path);
                    vs.cstate = vs.cstate.set(vlm_state_flags::DEPLOY);
                }
            }

            let assignment = cluster.assignments.get_mut(key).expect("assignment exists");
            assignment.cstate = assignment.cstate.set(assg_flags::DEPLOY);
            return Ok(true);
        }

        // Case 4: reconcile per-volume ATTACH and the assignment's CONNECT.
        let mut topology_changed = false;
        let vol_keys: Vec<_> = cluster
            .volume_states_for_assignment(&key.0, &key.1)
            .map(|vs| (vs.node_name.clone(), vs.resource_name.clone(), u16::from(vs.vol_nr)))
            .collect();

        for vs_key in &vol_keys {
            let (want_attach, have_attach, diskless) = {
                let vs = &cluster.volume_states[vs_key];
                let assignment = &cluster.assignments[key];
                (
                    vs.tstate.is_set(vlm_state_flags::ATTACH) && assignment.tstate.is_set(assg_flags::ATTACH),
                    vs.cstate.is_set(vlm_state_flags::ATTACH),
                    assignment.tstate.is_set(assg_flags::DISKLESS),
                )
            };
            if want_attach && !have_attach && !diskless {
                self.drbdadm
                    .attach(&key.1, vs_key.2)
                    .map_err(|e| e.to_string())?;
                cluster.volume_states.get_mut(vs_key).unwrap().cstate =
                    cluster.volume_states[vs_key].cstate.set(vlm_state_flags::ATTACH);
            } else if (!want_attach || diskless) && have_attach {
                self.drbdadm
                    .detach(&key.1, vs_key.2)
                    .map_err(|e| e.to_string())?;
                cluster.volume_states.get_mut(vs_key).unwrap().cstate =
                    cluster.volume_states[vs_key].cstate.clear(vlm_state_flags::ATTACH);
            }

            let resize_pending = cluster.volume_states[vs_key]
                .props
                .get(RESIZE_PENDING_PROP)
                .is_some();
            if resize_pending && cluster.volume_states[vs_key].cstate.is_set(vlm_state_flags::ATTACH) {
                let size_kib = cluster
                    .volumes
                    .get(&(key.1.clone(), vs_key.2))
                    .map(|v| v.size_kib)
                    .unwrap_or(0);
                self.storage
                    .extend_volume(&key.1, VolNr::from(vs_key.2), size_kib)
                    .map_err(|e| e.to_string())?;
                self.drbdadm
                    .resize(&key.1, vs_key.2)
                    .map_err(|e| e.to_string())?;
                cluster
                    .volume_states
                    .get_mut(vs_key)
                    .unwrap()
                    .props
                    .remove(RESIZE_PENDING_PROP);
            }
        }

        let assignment = cluster.assignments[key].clone();
        let want_connect = assignment.tstate.is_set(assg_flags::CONNECT);
        let have_connect = assignment.cstate.is_set(assg_flags::CONNECT);
        if want_connect && !have_connect {
            let discard = assignment.tstate.is_set(assg_flags::DISCARD);
            self.drbdadm
                .connect(&key.1, discard)
                .map_err(|e| e.to_string())?;
            let assignment = cluster.assignments.get_mut(key).unwrap();
            assignment.cstate = assignment.cstate.set(assg_flags::CONNECT);
            topology_changed = true;
        } else if !want_connect && have_connect {
            self.drbdadm.disconnect(&key.1).map_err(|e| e.to_string())?;
            let assignment = cluster.assignments.get_mut(key).unwrap();
            assignment.cstate = assignment.cstate.clear(assg_flags::CONNECT);
            topology_changed = true;
        }

        Ok(topology_changed)
    }

    /// Case 3: tear an assignment down.
    fn undeploy(
        &mut self,
        cluster: &mut ClusterState,
        resource_name: &str,
        key: &AssignmentKey,
    ) -> Result<(), String> {
        self.drbdadm.disconnect(resource_name).map_err(|e| e.to_string())?;
        self.drbdadm.down(resource_name).map_err(|e| e.to_string())?;

        let vol_keys: Vec<_> = cluster
            .volume_states_for_assignment(&key.0, &key.1)
            .map(|vs| (vs.node_name.clone(), vs.resource_name.clone(), u16::from(vs.vol_nr)))
            .collect();
        for vs_key in &vol_keys {
            self.storage
                .remove_volume(&key.1, VolNr::from(vs_key.2))
                .map_err(|e| e.to_string())?;
            let vs = cluster.volume_states.get_mut(vs_key).unwrap();
            vs.blockdevice_path = None;
            vs.cstate = vs.cstate.clear(vlm_state_flags::DEPLOY | vlm_state_flags::ATTACH);
        }

        let assignment = cluster.assignments.get_mut(key).unwrap();
        assignment.cstate = assignment
            .cstate
            .clear(assg_flags::DEPLOY | assg_flags::CONNECT);

        let still_deployed = cluster
            .assignments_for_resource(resource_name)
            .any(|a| a.tstate.is_set(assg_flags::DEPLOY));
        if still_deployed {
            self.rewrite_config(cluster, resource_name)
                .map_err(|e| e.to_string())?;
        } else {
            self.unlink_config(resource_name).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn bump_failure_count(&self, cluster: &mut ClusterState, key: &AssignmentKey) {
        if let Some(assignment) = cluster.assignments.get_mut(key) {
            assignment.failure_count += 1;
        }
    }

    fn rewrite_config(
        &self,
        cluster: &ClusterState,
        resource_name: &str,
    ) -> Result<(), drbdmanage_io::IoError> {
        let resource = match cluster.resources.get(resource_name) {
            Some(r) => r,
            None => return Ok(()),
        };
        let volumes: Vec<_> = cluster.volumes_for_resource(resource_name).collect();

        let assignments: Vec<_> = cluster
            .assignments_for_resource(resource_name)
            .filter(|a| a.tstate.is_set(assg_flags::DEPLOY))
            .collect();
        let mut views = Vec::with_capacity(assignments.len());
        for &assignment in &assignments {
            let Some(node) = cluster.nodes.get(&assignment.node_name) else {
                continue;
            };
            let volume_states: Vec<_> = cluster
                .volume_states_for_assignment(&assignment.node_name, resource_name)
                .collect();
            views.push(NodeView {
                node,
                assignment,
                volume_states,
            });
        }

        let rendered = render_resource_config(resource, &volumes, &views);
        let path = self.conf_dir.join(format!("drbdmanage_{resource_name}.res"));
        self.io.write_all(&path, rendered.as_bytes())
    }

    fn unlink_config(&self, resource_name: &str) -> Result<(), drbdmanage_io::IoError> {
        let path = self.conf_dir.join(format!("drbdmanage_{resource_name}.res"));
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cascading garbage collection: assignments, then nodes, then volume
    /// states, then volumes, then resources.
    fn gc(&mut self, cluster: &mut ClusterState, report: &mut RunReport) {
        let dead_assignments: Vec<AssignmentKey> = cluster
            .assignments
            .iter()
            .filter(|(_, a)| {
                !a.cstate.is_set(assg_flags::DEPLOY) && !a.tstate.is_set(assg_flags::DEPLOY)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &dead_assignments {
            cluster.assignments.remove(key);
            report.removed_assignments += 1;
            self.notifier
                .notify_removed(&format!("/resources/{}/{}", key.1, key.0));
        }

        let dead_nodes: Vec<String> = cluster
            .nodes
            .iter()
            .filter(|(_, node)| {
                node.cstate.is_set(node_flags::REMOVE) || node.tstate.is_set(node_flags::REMOVE)
            })
            .filter(|(name, _)| cluster.assignments_for_node(name).next().is_none())
            .map(|(name, _)| name.clone())
            .collect();
        let any_node_removed = !dead_nodes.is_empty();
        for name in &dead_nodes {
            cluster.nodes.remove(name);
            report.removed_nodes += 1;
            self.notifier.notify_removed(&format!("/nodes/{name}"));
        }
        if any_node_removed {
            let control = self.control_resource_name.clone();
            if let Err(err) = self.rewrite_config(cluster, &control) {
                tracing::warn!(%err, "failed to regenerate control resource config after node removal");
            } else if let Err(err) = self.drbdadm.adjust(&control, false) {
                tracing::warn!(%err, "drbdadm adjust on control resource failed after node removal");
            }
        }

        let dead_volume_states: Vec<_> = cluster
            .volume_states
            .iter()
            .filter(|(_, vs)| {
                !vs.cstate.is_set(vlm_state_flags::DEPLOY) && !vs.tstate.is_set(vlm_state_flags::DEPLOY)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &dead_volume_states {
            cluster.volume_states.remove(key);
            report.removed_volume_states += 1;
            self.notifier
                .notify_removed(&format!("/resources/{}/{}/{}", key.1, key.0, key.2));
        }

        let dead_volumes: Vec<_> = cluster
            .volumes
            .iter()
            .filter(|((res_name, vol_nr), v)| {
                (v.cstate.is_set(vlm_flags::REMOVE) || v.tstate.is_set(vlm_flags::REMOVE))
                    && !cluster
                        .volume_states
                        .values()
                        .any(|vs| &vs.resource_name == res_name && u16::from(vs.vol_nr) == *vol_nr
                            && vs.cstate.is_set(vlm_state_flags::DEPLOY))
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &dead_volumes {
            cluster.volumes.remove(key);
            report.removed_volumes += 1;
            self.notifier
                .notify_removed(&format!("/resources/{}/volumes/{}", key.0, key.1));
        }

        let dead_resources: Vec<String> = cluster
            .resources
            .iter()
            .filter(|(name, r)| {
                (r.cstate.is_set(rsc_flags::REMOVE) || r.tstate.is_set(rsc_flags::REMOVE))
                    && cluster.assignments_for_resource(name).next().is_none()
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &dead_resources {
            cluster.resources.remove(name);
            report.removed_resources += 1;
            self.notifier.notify_removed(&format!("/resources/{name}"));
        }
    }
}
