//! The storage backend trait.
//!
//! A concrete backend (LVM, ZFS, a file-backed loop device, ...) is out of
//! scope for this core; what belongs here is the interface the
//! reconciliation engine drives and the registry that resolves a backend by
//! the `storage-plugin` configuration key.

use drbdmanage_types::VolNr;

use crate::StorageError;

/// Pool-level free/total space, as last refreshed by `update_pool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub poolsize_kib: u64,
    pub poolfree_kib: u64,
}

/// Operations the reconciliation engine needs from a storage backend.
///
/// All methods are synchronous and expected to shell out to the concrete
/// backend's tooling (`lvcreate`, `zfs create`, ...); the reconciler treats
/// each call as a blocking step in its non-preemptive run.
pub trait StorageBackend: Send + Sync {
    /// Creates a new volume and returns the path to its block device.
    fn create_volume(
        &self,
        resource_name: &str,
        vol_nr: VolNr,
        size_kib: u64,
    ) -> Result<String, StorageError>;

    /// Removes a previously created volume.
    fn remove_volume(&self, resource_name: &str, vol_nr: VolNr) -> Result<(), StorageError>;

    /// Extends an existing volume to a larger size. Backends that cannot
    /// shrink a volume should reject a smaller `new_size_kib` themselves.
    fn extend_volume(
        &self,
        resource_name: &str,
        vol_nr: VolNr,
        new_size_kib: u64,
    ) -> Result<(), StorageError>;

    /// Refreshes and returns this node's pool-level space statistics.
    fn update_pool(&self) -> Result<PoolStats, StorageError>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory backend used to test reconciler/server logic without a
    /// real LVM/ZFS stack.
    #[derive(Default)]
    pub struct FakeStorageBackend {
        volumes: Mutex<HashMap<(String, u16), u64>>,
    }

    impl StorageBackend for FakeStorageBackend {
        fn create_volume(
            &self,
            resource_name: &str,
            vol_nr: VolNr,
            size_kib: u64,
        ) -> Result<String, StorageError> {
            self.volumes
                .lock()
                .unwrap()
                .insert((resource_name.to_string(), vol_nr.into()), size_kib);
            Ok(format!("/dev/drbdpool/{resource_name}_{vol_nr}"))
        }

        fn remove_volume(&self, resource_name: &str, vol_nr: VolNr) -> Result<(), StorageError> {
            self.volumes
                .lock()
                .unwrap()
                .remove(&(resource_name.to_string(), vol_nr.into()));
            Ok(())
        }

        fn extend_volume(
            &self,
            resource_name: &str,
            vol_nr: VolNr,
            new_size_kib: u64,
        ) -> Result<(), StorageError> {
            let mut volumes = self.volumes.lock().unwrap();
            let key = (resource_name.to_string(), vol_nr.into());
            let current = volumes.get(&key).copied().ok_or(StorageError::BlockDeviceNotFound {
                resource: resource_name.to_string(),
                vol_nr: vol_nr.into(),
            })?;
            if new_size_kib < current {
                return Err(StorageError::BackendFailed("cannot shrink volume".into()));
            }
            volumes.insert(key, new_size_kib);
            Ok(())
        }

        fn update_pool(&self) -> Result<PoolStats, StorageError> {
            Ok(PoolStats {
                poolsize_kib: 1_000_000,
                poolfree_kib: 500_000,
            })
        }
    }

    #[test]
    fn fake_backend_create_then_extend() {
        let backend = FakeStorageBackend::default();
        backend.create_volume("res0", VolNr::new(0), 1024).unwrap();
        backend.extend_volume("res0", VolNr::new(0), 2048).unwrap();
        assert!(backend
            .extend_volume("res0", VolNr::new(0), 1024)
            .is_err());
    }
}
