//! The persistence gateway.
//!
//! Wraps a single control-volume file: an advisory lock for mutual
//! exclusion, a content hash for change detection, and postcard encoding of
//! the [`ClusterState`] aggregate. A writer opens with an exclusive lock,
//! compares the just-read hash against the hash it last saw, and reloads
//! before mutating if another node wrote a newer generation in the
//! meantime.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use drbdmanage_io::{IoBackend, OpenFlags, SyncBackend};
use drbdmanage_model::ClusterState;
use fs2::FileExt;

use crate::hash::{hash_bytes, ConfigHash};
use crate::PersistenceError;

/// A held lock plus the hash observed at open time.
struct OpenState {
    lock_file: File,
    exclusive: bool,
}

/// Gateway over a single control-volume file.
pub struct PersistenceGateway {
    path: PathBuf,
    io: SyncBackend,
    open_state: Option<OpenState>,
    stored_hash: Option<ConfigHash>,
}

impl PersistenceGateway {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: SyncBackend::new(),
            open_state: None,
            stored_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the control volume, taking an exclusive lock for a write
    /// transaction or a shared lock for a read-only one.
    pub fn open(&mut self, exclusive: bool) -> Result<(), PersistenceError> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| PersistenceError::Lock {
                path: self.path.clone(),
                source,
            })?;

        if exclusive {
            lock_file
                .lock_exclusive()
                .map_err(|source| PersistenceError::Lock {
                    path: self.path.clone(),
                    source,
                })?;
        } else {
            lock_file
                .lock_shared()
                .map_err(|source| PersistenceError::Lock {
                    path: self.path.clone(),
                    source,
                })?;
        }

        self.open_state = Some(OpenState {
            lock_file,
            exclusive,
        });
        tracing::debug!(path = %self.path.display(), exclusive, "opened control volume");
        Ok(())
    }

    /// Releases the lock and forgets the cached hash. Swallows unlock
    /// errors the way `end_modify_conf` swallows close errors: by this
    /// point the caller's transaction has already committed or failed, and
    /// a lock-release failure must not mask that outcome.
    pub fn close(&mut self) {
        if let Some(state) = self.open_state.take() {
            let _ = state.lock_file.unlock();
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_state.is_some()
    }

    pub fn is_exclusive(&self) -> bool {
        self.open_state.as_ref().is_some_and(|s| s.exclusive)
    }

    /// Reads the control volume's current byte image and returns its hash,
    /// without deserializing it. Used by `begin_modify_conf` to decide
    /// whether a reload is necessary before a new hash is known to it.
    pub fn peek_stored_hash(&self) -> Result<ConfigHash, PersistenceError> {
        let bytes = self.io.read_all(&self.path)?;
        Ok(hash_bytes(&bytes))
    }

    pub fn stored_hash(&self) -> Option<ConfigHash> {
        self.stored_hash
    }

    pub fn hashes_match(&self, other: ConfigHash) -> bool {
        self.stored_hash == Some(other)
    }

    /// Loads and deserializes the cluster configuration, recording its hash.
    pub fn load(&mut self) -> Result<ClusterState, PersistenceError> {
        let bytes = self.io.read_all(&self.path)?;
        self.stored_hash = Some(hash_bytes(&bytes));
        if bytes.is_empty() {
            return Ok(ClusterState::new());
        }
        let state: ClusterState = postcard::from_bytes(&bytes)?;
        Ok(state)
    }

    /// Serializes and writes the cluster configuration, recording its new
    /// hash. The caller is responsible for bumping `state.serial` first if
    /// the save should force a hash change.
    pub fn save(&mut self, state: &ClusterState) -> Result<(), PersistenceError> {
        let bytes = postcard::to_allocvec(state)?;
        self.io.write_all(&self.path, &bytes)?;
        self.stored_hash = Some(hash_bytes(&bytes));
        Ok(())
    }

    pub fn open_flags_for(exclusive: bool) -> OpenFlags {
        if exclusive {
            OpenFlags::append_create()
        } else {
            OpenFlags::read_only()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drbdmanage_model::{AddressFamily, Node};
    use drbdmanage_types::{NodeId, StateFlags};

    fn sample_state() -> ClusterState {
        let mut state = ClusterState::new();
        state.nodes.insert(
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
        state
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drbdctrl.dat");
        let mut gateway = PersistenceGateway::new(&path);

        gateway.open(true).unwrap();
        gateway.save(&sample_state()).unwrap();
        gateway.close();

        let mut gateway = PersistenceGateway::new(&path);
        gateway.open(false).unwrap();
        let loaded = gateway.load().unwrap();
        gateway.close();

        assert_eq!(loaded, sample_state());
    }

    #[test]
    fn hash_changes_when_bytes_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drbdctrl.dat");
        let mut gateway = PersistenceGateway::new(&path);
        gateway.open(true).unwrap();

        gateway.save(&ClusterState::new()).unwrap();
        let first = gateway.stored_hash().unwrap();

        let mut state = sample_state();
        state.poke();
        gateway.save(&state).unwrap();
        let second = gateway.stored_hash().unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn loading_empty_file_yields_default_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drbdctrl.dat");
        let mut gateway = PersistenceGateway::new(&path);
        gateway.open(true).unwrap();
        gateway.io.write_all(&path, b"").unwrap();

        let loaded = gateway.load().unwrap();
        assert_eq!(loaded, ClusterState::new());
    }
}
