//! Domain Ports - Collaborator trait definitions for the controller
//!
//! These traits define the boundary between the volume lifecycle logic and
//! the virtualization platform. Adapters implement them to provide concrete
//! connection management and datacenter operations.

use crate::domain::disk::{FirstClassDisk, StoragePoolRef, VolumeOptions};
use crate::error::DriverError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Result type for collaborator calls
pub type DriverResult<T> = std::result::Result<T, DriverError>;

// =============================================================================
// Discovery Results
// =============================================================================

/// One virtualization-management endpoint paired with one of its datacenters
#[derive(Clone)]
pub struct BackendInstance {
    /// Endpoint the datacenter was found on
    pub vc_server: String,
    pub datacenter: DatacenterRef,
}

impl BackendInstance {
    pub fn new(vc_server: impl Into<String>, datacenter: DatacenterRef) -> Self {
        Self {
            vc_server: vc_server.into(),
            datacenter,
        }
    }

    pub fn datacenter_name(&self) -> &str {
        self.datacenter.name()
    }
}

impl fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendInstance")
            .field("vc_server", &self.vc_server)
            .field("datacenter", &self.datacenter.name())
            .finish()
    }
}

/// Placement lookup for one topology segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneQuery {
    /// Tag category holding zone names
    pub zone_category: String,
    /// Tag category holding region names
    pub region_category: String,
    pub zone: String,
    pub region: String,
}

// =============================================================================
// Connection Manager Port
// =============================================================================

/// Port for the process-wide connection layer
///
/// Owns sessions and per-endpoint pools; the controller holds one instance
/// for its whole lifetime.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Configured virtualization-management endpoints
    fn virtual_centers(&self) -> Vec<String>;

    /// API version reported by an endpoint
    async fn api_version(&self, vc_server: &str) -> DriverResult<String>;

    /// Find the single datacenter whose zone/region tags match
    async fn resolve_by_zone(&self, query: &ZoneQuery) -> DriverResult<BackendInstance>;

    /// Every datacenter on every endpoint, in enumeration order
    async fn backend_instances(&self) -> DriverResult<Vec<BackendInstance>>;
}

// =============================================================================
// Datacenter Port
// =============================================================================

/// Port for disk and node operations within one datacenter
#[async_trait]
pub trait Datacenter: Send + Sync {
    fn name(&self) -> &str;

    /// Look a disk up by display name within a pool
    async fn find_disk_by_name(
        &self,
        pool: &StoragePoolRef,
        name: &str,
    ) -> DriverResult<Option<FirstClassDisk>>;

    /// Look a disk up by id anywhere in the datacenter
    async fn find_disk_by_id(&self, id: &str) -> DriverResult<Option<FirstClassDisk>>;

    /// Create a disk. Does not return the descriptor.
    async fn create_disk(
        &self,
        pool: &StoragePoolRef,
        name: &str,
        size_mb: u64,
    ) -> DriverResult<()>;

    async fn delete_disk(&self, pool: &StoragePoolRef, id: &str) -> DriverResult<()>;

    /// All disks in the datacenter
    async fn list_disks(&self) -> DriverResult<Vec<FirstClassDisk>>;

    /// Resolve a compute node by its DNS name
    async fn find_vm_by_dns_name(&self, dns_name: &str) -> DriverResult<VirtualMachineRef>;
}

// =============================================================================
// Virtual Machine Port
// =============================================================================

/// Port for a compute node that disks are attached to
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    fn name(&self) -> &str;

    /// Attach a backing file as a new virtual disk, returning its UUID
    async fn attach_disk(&self, file_path: &str, options: &VolumeOptions) -> DriverResult<String>;

    async fn detach_disk(&self, file_path: &str) -> DriverResult<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ConnectionManagerRef = Arc<dyn ConnectionManager>;
pub type DatacenterRef = Arc<dyn Datacenter>;
pub type VirtualMachineRef = Arc<dyn VirtualMachine>;
