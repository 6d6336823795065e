//! Volume Store
//!
//! Idempotent create, id resolution and delete of first-class disks against
//! a resolved backend instance.

use crate::controlplane::context::RequestContext;
use crate::domain::disk::{FirstClassDisk, StoragePoolRef};
use crate::domain::ports::{BackendInstance, ConnectionManagerRef};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// Name Locks
// =============================================================================

/// In-process per-name mutexes narrowing the lookup-then-create window.
/// Concurrent controllers can still race; the backend stays authoritative.
#[derive(Default)]
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry once nobody else holds or waits on it
    fn release(&self, name: &str) {
        self.locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// =============================================================================
// Create Outcome
// =============================================================================

/// Result of an idempotent create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(FirstClassDisk),
    /// A disk with the same name and size already existed
    Existing(FirstClassDisk),
}

impl CreateOutcome {
    pub fn disk(&self) -> &FirstClassDisk {
        match self {
            CreateOutcome::Created(d) | CreateOutcome::Existing(d) => d,
        }
    }

    pub fn into_disk(self) -> FirstClassDisk {
        match self {
            CreateOutcome::Created(d) | CreateOutcome::Existing(d) => d,
        }
    }
}

// =============================================================================
// Volume Store
// =============================================================================

/// Disk lifecycle operations against the connection layer
pub struct VolumeStore {
    connections: ConnectionManagerRef,
    name_locks: Option<NameLocks>,
}

impl VolumeStore {
    pub fn new(connections: ConnectionManagerRef, serialize_creates: bool) -> Self {
        Self {
            connections,
            name_locks: serialize_creates.then(NameLocks::new),
        }
    }

    /// Return the existing disk of this name and size, or create it
    pub async fn create_or_get(
        &self,
        ctx: &RequestContext,
        instance: &BackendInstance,
        pool: &StoragePoolRef,
        name: &str,
        size_mb: u64,
    ) -> Result<CreateOutcome> {
        let Some(locks) = &self.name_locks else {
            return self.create_unlocked(ctx, instance, pool, name, size_mb).await;
        };

        let lock = locks.handle(name);
        let result = match ctx.run("AcquireNameLock", lock.lock()).await {
            Ok(_guard) => self.create_unlocked(ctx, instance, pool, name, size_mb).await,
            Err(e) => Err(e),
        };
        drop(lock);
        locks.release(name);
        result
    }

    async fn create_unlocked(
        &self,
        ctx: &RequestContext,
        instance: &BackendInstance,
        pool: &StoragePoolRef,
        name: &str,
        size_mb: u64,
    ) -> Result<CreateOutcome> {
        let datacenter = &instance.datacenter;

        let existing = ctx
            .run("GetFirstClassDisk", datacenter.find_disk_by_name(pool, name))
            .await?
            .map_err(|e| {
                let msg = format!("GetFirstClassDisk({}) failed. Err: {}", name, e);
                error!("{}", msg);
                Error::Internal(msg)
            })?;

        if let Some(disk) = existing {
            warn!(
                "Volume with name {} already exists. Checking for similar parameters.",
                name
            );
            if disk.capacity_mb != size_mb {
                let msg = format!(
                    "Volume already exists but requesting different size. \
                     Existing {} != Requested {}",
                    disk.capacity_mb, size_mb
                );
                error!("{}", msg);
                return Err(Error::AlreadyExists(msg));
            }
            return Ok(CreateOutcome::Existing(disk));
        }

        ctx.run("CreateFirstClassDisk", datacenter.create_disk(pool, name, size_mb))
            .await?
            .map_err(|e| {
                let msg = format!("CreateFirstClassDisk failed. Err: {}", e);
                error!("{}", msg);
                Error::Internal(msg)
            })?;

        // creation does not hand back the descriptor
        let created = ctx
            .run("GetFirstClassDisk", datacenter.find_disk_by_name(pool, name))
            .await?;

        match created {
            Ok(Some(disk)) => {
                info!("Created volume {} ({} MB) with id {}", name, size_mb, disk.id);
                Ok(CreateOutcome::Created(disk))
            }
            Ok(None) => {
                let msg = format!(
                    "GetFirstClassDiskByName({}) failed. Err: not found after create",
                    name
                );
                error!("{}", msg);
                Err(Error::Internal(msg))
            }
            Err(e) => {
                let msg = format!("GetFirstClassDiskByName({}) failed. Err: {}", name, e);
                error!("{}", msg);
                Err(Error::Internal(msg))
            }
        }
    }

    /// Find which backend instance owns a disk id
    pub async fn resolve_by_id(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> Result<(BackendInstance, FirstClassDisk)> {
        let instances = ctx
            .run("ListBackendInstances", self.connections.backend_instances())
            .await?
            .map_err(|e| Error::Internal(format!("listing backend instances failed: {}", e)))?;

        let mut last_failure = None;
        for instance in instances {
            let lookup = ctx
                .run("FindFirstClassDisk", instance.datacenter.find_disk_by_id(volume_id))
                .await?;
            match lookup {
                Ok(Some(disk)) => {
                    debug!(
                        "Volume {} found on {}/{}",
                        volume_id,
                        instance.vc_server,
                        instance.datacenter_name()
                    );
                    return Ok((instance, disk));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Lookup of {} on {}/{} failed: {}",
                        volume_id,
                        instance.vc_server,
                        instance.datacenter_name(),
                        e
                    );
                    last_failure = Some(e);
                }
            }
        }

        // an unreachable instance may still own the id
        match last_failure {
            Some(e) => Err(Error::Internal(format!(
                "could not rule out volume {} on every backend: {}",
                volume_id, e
            ))),
            None => Err(Error::DiskIdNotFound {
                volume_id: volume_id.to_string(),
            }),
        }
    }

    /// Unconditional delete by id
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        instance: &BackendInstance,
        pool: &StoragePoolRef,
        volume_id: &str,
    ) -> Result<()> {
        ctx.run("DeleteFirstClassDisk", instance.datacenter.delete_disk(pool, volume_id))
            .await?
            .map_err(|e| {
                let msg = format!("DeleteFirstClassDisk({}) failed. Err: {}", volume_id, e);
                error!("{}", msg);
                Error::Internal(msg)
            })?;

        info!("Deleted volume {} from {}", volume_id, pool);
        Ok(())
    }
}
