//! First-class disk model
//!
//! Disk descriptors as returned by the datacenter driver, the storage pool
//! reference a disk is created in, and the attribute map handed back to the
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Default volume size when no capacity range is given
pub const DEFAULT_GB_DISK_SIZE: u64 = 10;

pub const MB_IN_BYTES: u64 = 1024 * 1024;
pub const GB_IN_BYTES: u64 = 1024 * 1024 * 1024;

/// Value of the `type` attribute on every volume
pub const FIRST_CLASS_DISK_TYPE: &str = "First Class Disk";

pub const ATTRIBUTE_TYPE: &str = "type";
pub const ATTRIBUTE_NAME: &str = "name";
pub const ATTRIBUTE_PARENT_TYPE: &str = "parent_type";
pub const ATTRIBUTE_PARENT_NAME: &str = "parent_name";
pub const ATTRIBUTE_OWNING_DATASTORE: &str = "owning_datastore";
pub const ATTRIBUTE_VCENTER: &str = "vcenter";
pub const ATTRIBUTE_DATACENTER: &str = "datacenter";
pub const ATTRIBUTE_PAGE83_DATA: &str = "page83data";
pub const ATTRIBUTE_ZONE: &str = "zone";
pub const ATTRIBUTE_REGION: &str = "region";

/// Topology segment keys
pub const LABEL_ZONE_REGION: &str = "failure-domain.beta.kubernetes.io/region";
pub const LABEL_ZONE_FAILURE_DOMAIN: &str = "failure-domain.beta.kubernetes.io/zone";

// =============================================================================
// Storage Pools
// =============================================================================

/// Kind of container a disk's parent name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentType {
    Datastore,
    DatastoreCluster,
}

impl ParentType {
    /// Parse a `parent_type` parameter. Only an exact `Datastore` selects a
    /// single pool; every other value selects a cluster.
    pub fn from_parameter(value: &str) -> Self {
        if value == "Datastore" {
            ParentType::Datastore
        } else {
            ParentType::DatastoreCluster
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParentType::Datastore => "Datastore",
            ParentType::DatastoreCluster => "DatastoreCluster",
        }
    }
}

impl fmt::Display for ParentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named pool together with its kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePoolRef {
    pub parent_type: ParentType,
    pub name: String,
}

impl StoragePoolRef {
    pub fn datastore(name: impl Into<String>) -> Self {
        Self {
            parent_type: ParentType::Datastore,
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            parent_type: ParentType::DatastoreCluster,
            name: name.into(),
        }
    }
}

impl fmt::Display for StoragePoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.parent_type, self.name)
    }
}

// =============================================================================
// Disk Descriptor
// =============================================================================

/// Backing descriptor of a disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskBacking {
    /// Disk is backed by a file on a datastore
    File { file_path: String },
    /// Any backing kind the controller does not handle (raw device, etc.)
    Other { kind: String },
}

/// Where the bytes of a disk live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskParent {
    Datastore { datastore: String },
    DatastoreCluster { cluster: String, datastore: String },
}

impl DiskParent {
    pub fn parent_type(&self) -> ParentType {
        match self {
            DiskParent::Datastore { .. } => ParentType::Datastore,
            DiskParent::DatastoreCluster { .. } => ParentType::DatastoreCluster,
        }
    }

    /// Pool reference used to address the disk in delete calls
    pub fn pool(&self) -> StoragePoolRef {
        match self {
            DiskParent::Datastore { datastore } => StoragePoolRef::datastore(datastore.clone()),
            DiskParent::DatastoreCluster { cluster, .. } => {
                StoragePoolRef::cluster(cluster.clone())
            }
        }
    }

    /// Datastore currently holding the bytes
    pub fn owning_datastore(&self) -> &str {
        match self {
            DiskParent::Datastore { datastore } => datastore,
            DiskParent::DatastoreCluster { datastore, .. } => datastore,
        }
    }
}

/// Descriptor of a provisioned first-class disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstClassDisk {
    pub id: String,
    pub name: String,
    pub capacity_mb: u64,
    pub parent: DiskParent,
    pub backing: DiskBacking,
}

impl FirstClassDisk {
    /// Capacity in bytes, or `None` when it does not fit a signed 64-bit count
    pub fn capacity_bytes(&self) -> Option<i64> {
        self.capacity_mb
            .checked_mul(MB_IN_BYTES)
            .and_then(|bytes| i64::try_from(bytes).ok())
    }

    pub fn parent_type(&self) -> ParentType {
        self.parent.parent_type()
    }

    /// Backing file path, or `None` when the backing is not file-based
    pub fn file_path(&self) -> Option<&str> {
        match &self.backing {
            DiskBacking::File { file_path } => Some(file_path),
            DiskBacking::Other { .. } => None,
        }
    }

    /// Build the attribute map returned with every volume
    pub fn attributes(&self, vcenter: &str, datacenter: &str) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTRIBUTE_TYPE.to_string(), FIRST_CLASS_DISK_TYPE.to_string());
        attributes.insert(
            ATTRIBUTE_VCENTER.to_string(),
            remove_port_from_host(vcenter).to_string(),
        );
        attributes.insert(ATTRIBUTE_DATACENTER.to_string(), datacenter.to_string());
        attributes.insert(ATTRIBUTE_NAME.to_string(), self.name.clone());
        attributes.insert(
            ATTRIBUTE_PARENT_TYPE.to_string(),
            self.parent_type().as_str().to_string(),
        );

        match &self.parent {
            DiskParent::Datastore { datastore } => {
                attributes.insert(ATTRIBUTE_PARENT_NAME.to_string(), datastore.clone());
            }
            DiskParent::DatastoreCluster { cluster, datastore } => {
                attributes.insert(ATTRIBUTE_PARENT_NAME.to_string(), cluster.clone());
                attributes.insert(ATTRIBUTE_OWNING_DATASTORE.to_string(), datastore.clone());
            }
        }

        attributes
    }
}

/// Strip a trailing `:port` from an endpoint host
pub fn remove_port_from_host(host: &str) -> &str {
    if host.starts_with('[') {
        // bracketed IPv6 literal
        return match host.find(']') {
            Some(end) => &host[1..end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((h, port)) if !h.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

/// Round a byte count up to whole gibibytes, expressed in megabytes
pub fn round_up_to_gib_in_mb(bytes: u64) -> u64 {
    bytes.div_ceil(GB_IN_BYTES) * 1024
}

// =============================================================================
// Attach Options
// =============================================================================

/// Virtual bus controller a disk is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScsiControllerType {
    ParaVirtual,
}

impl ScsiControllerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScsiControllerType::ParaVirtual => "pvscsi",
        }
    }
}

/// Options passed to a node attach call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    pub scsi_controller_type: ScsiControllerType,
}
