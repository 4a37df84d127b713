//! The server façade: the struct every mutator/query method hangs off of,
//! plus the transaction skeleton that wraps each mutator in an open/load
//! -if-stale/mutate/save/close cycle over the control volume.

use std::sync::Arc;

use drbdmanage_config::DrbdmanageConfig;
use drbdmanage_drbdadm::DrbdAdm;
use drbdmanage_model::ClusterState;
use drbdmanage_persistence::PersistenceGateway;
use drbdmanage_reconcile::{ChangeNotifier, Reconciler};
use drbdmanage_storage::StorageBackend;
use drbdmanage_types::ErrorCode;

use crate::deployer::Deployer;
use crate::error::ServerError;

/// Per-resource volume-id ceiling. DRBD9 itself imposes no hard limit here;
/// this bounds the allocator range the way `min-minor-nr`/`max-port-nr`
/// bound theirs.
pub const MAX_RES_VOLS: u16 = 255;

/// Owns the in-memory cluster configuration, the persistence gateway for
/// the replicated control volume, and the collaborators (storage backend,
/// DRBD admin interface, deployer policy, change notifier) every mutator
/// needs.
pub struct ServerFacade<N: ChangeNotifier> {
    pub(crate) gateway: PersistenceGateway,
    pub(crate) state: ClusterState,
    pub(crate) reconciler: Reconciler<N>,
    pub(crate) storage: Arc<dyn StorageBackend>,
    pub(crate) drbdadm: DrbdAdm,
    pub(crate) config: DrbdmanageConfig,
    pub(crate) deployer: Box<dyn Deployer>,
    pub(crate) local_node_name: String,
}

impl<N: ChangeNotifier> ServerFacade<N> {
    /// Builds a façade over an already-located control volume, performing
    /// the initial load.
    pub fn new(
        control_volume_path: impl Into<std::path::PathBuf>,
        storage: Arc<dyn StorageBackend>,
        notifier: N,
        config: DrbdmanageConfig,
        deployer: Box<dyn Deployer>,
        local_node_name: impl Into<String>,
    ) -> Result<Self, ServerError> {
        let mut gateway = PersistenceGateway::new(control_volume_path);
        gateway.open(true)?;
        let state = gateway.load()?;
        gateway.close();

        let drbdadm = DrbdAdm::new(config.drbdadm_path.clone(), config.extend_path.clone());
        let reconciler = Reconciler::new(
            Arc::clone(&storage),
            DrbdAdm::new(config.drbdadm_path.clone(), config.extend_path.clone()),
            notifier,
            ".drbdctrl",
            config.drbd_conf_path.clone(),
        );

        Ok(Self {
            gateway,
            state,
            reconciler,
            storage,
            drbdadm,
            config,
            deployer,
            local_node_name: local_node_name.into(),
        })
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<N> {
        &mut self.reconciler
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn drbdadm(&self) -> &DrbdAdm {
        &self.drbdadm
    }

    pub fn config(&self) -> &DrbdmanageConfig {
        &self.config
    }

    /// Opens the control volume for a write transaction, reloading the
    /// in-memory state if another node wrote a newer generation since the
    /// last time this façade observed it.
    fn begin_modify_conf(&mut self) -> Result<(), ServerError> {
        self.gateway.open(true)?;
        let on_disk_hash = self.gateway.peek_stored_hash()?;
        if !self.gateway.hashes_match(on_disk_hash) {
            self.state = self.gateway.load()?;
            tracing::debug!("reloaded cluster configuration before transaction");
        }
        Ok(())
    }

    /// Saves the in-memory state (on success) and releases the lock. A
    /// successful save schedules a reconcile run; it does not run one
    /// inline, since a transaction may be one of several batched by the
    /// caller before the event loop next drains pending reconciles.
    fn end_modify_conf(&mut self, result: Result<(), ErrorCode>) -> ErrorCode {
        let code = match result {
            Ok(()) => match self.gateway.save(&self.state) {
                Ok(()) => {
                    self.reconciler.request_run();
                    ErrorCode::Success
                }
                Err(err) => {
                    tracing::error!(%err, "failed to save cluster configuration");
                    ErrorCode::EPersist
                }
            },
            Err(code) => code,
        };
        self.gateway.close();
        code
    }

    /// Runs `body` inside an open/reload-if-stale/save/close transaction.
    /// `body` mutates [`ClusterState`] in place and returns `Ok(())` to
    /// commit or `Err(code)` to abort without saving.
    pub(crate) fn transact<F>(&mut self, body: F) -> ErrorCode
    where
        F: FnOnce(&mut ClusterState) -> Result<(), ErrorCode>,
    {
        if let Err(err) = self.begin_modify_conf() {
            tracing::error!(%err, "failed to open control volume for transaction");
            return ErrorCode::ECtrlVol;
        }
        let result = body(&mut self.state);
        self.end_modify_conf(result)
    }

    /// Reloads the configuration file and rebuilds the storage-facing
    /// collaborators without touching in-memory domain state, for the
    /// `reconfigure` operation.
    /// Runs a reconcile pass if one is pending, persisting whatever it
    /// changed. Called from the event loop after a trigger arrives (an
    /// events2 line, a mutator's `request_run`, or the scheduled tick) —
    /// not on every loop iteration, since most ticks have nothing pending.
    pub fn run_reconcile(&mut self) -> Result<drbdmanage_reconcile::RunReport, ServerError> {
        if !self.reconciler.take_pending() {
            return Ok(drbdmanage_reconcile::RunReport::default());
        }
        self.gateway.open(true)?;
        let on_disk_hash = self.gateway.peek_stored_hash()?;
        if !self.gateway.hashes_match(on_disk_hash) {
            self.state = self.gateway.load()?;
        }
        let report = self.reconciler.run(&mut self.state, false, false)?;
        self.gateway.save(&self.state)?;
        self.gateway.close();
        Ok(report)
    }

    pub fn reconfigure(&mut self, storage: Arc<dyn StorageBackend>) -> Result<(), ServerError> {
        let config = DrbdmanageConfig::load()?;
        self.drbdadm = DrbdAdm::new(config.drbdadm_path.clone(), config.extend_path.clone());
        self.storage = storage;
        self.config = config;
        Ok(())
    }
}
