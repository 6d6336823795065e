//! Simulated Virtualization Inventory
//!
//! In-memory implementation of the connection manager, datacenter and
//! virtual machine ports, seeded from the configuration inventory. Used in
//! standalone mode and by the controller tests.

use crate::config::{Config, DatacenterConfig};
use crate::domain::disk::{
    DiskBacking, DiskParent, FirstClassDisk, ParentType, StoragePoolRef, VolumeOptions,
};
use crate::domain::ports::{
    BackendInstance, ConnectionManager, Datacenter, DatacenterRef, DriverResult, VirtualMachine,
    VirtualMachineRef, ZoneQuery,
};
use crate::error::DriverError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Fault Injection
// =============================================================================

/// Simulated backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    ApiVersion,
    ResolveZone,
    ListInstances,
    FindDiskByName,
    FindDiskById,
    CreateDisk,
    DeleteDisk,
    ListDisks,
    FindVm,
    AttachDisk,
    DetachDisk,
}

/// Failure injection and call accounting shared by simulated objects
#[derive(Debug, Default)]
pub struct FaultInjector {
    failures: Mutex<BTreeMap<Operation, DriverError>>,
    latency: Mutex<Option<Duration>>,
    calls: DashMap<Operation, u64>,
}

impl FaultInjector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `operation` fail with `error` until cleared
    pub fn fail(&self, operation: Operation, error: DriverError) {
        self.failures.lock().insert(operation, error);
    }

    pub fn clear(&self, operation: Operation) {
        self.failures.lock().remove(&operation);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls.get(&operation).map(|c| *c).unwrap_or(0)
    }

    async fn enter(&self, operation: Operation) -> DriverResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.lock().get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

struct SimulatedVirtualCenter {
    server: String,
    port: u16,
    api_version: String,
    datacenters: Vec<Arc<SimulatedDatacenter>>,
}

/// Connection manager over an in-memory inventory
pub struct SimulatedConnectionManager {
    centers: Vec<SimulatedVirtualCenter>,
    faults: Arc<FaultInjector>,
}

impl SimulatedConnectionManager {
    /// Build the inventory described by the configuration
    pub fn from_config(config: &Config) -> Self {
        let centers = config
            .virtual_centers
            .iter()
            .map(|(server, vc)| SimulatedVirtualCenter {
                server: server.clone(),
                port: vc.port,
                api_version: vc.api_version.clone(),
                datacenters: vc
                    .datacenters
                    .iter()
                    .map(|dc| Arc::new(SimulatedDatacenter::from_config(dc)))
                    .collect(),
            })
            .collect::<Vec<_>>();

        info!(
            "Simulated inventory: {} virtual centers, {} datacenters",
            centers.len(),
            centers.iter().map(|vc| vc.datacenters.len()).sum::<usize>()
        );

        Self {
            centers,
            faults: FaultInjector::new(),
        }
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// Simulated datacenter by endpoint and name
    pub fn datacenter(&self, vc_server: &str, name: &str) -> Option<Arc<SimulatedDatacenter>> {
        self.centers
            .iter()
            .find(|vc| vc.server == vc_server)?
            .datacenters
            .iter()
            .find(|dc| dc.name == name)
            .cloned()
    }

    fn instances(
        &self,
    ) -> impl Iterator<Item = (&SimulatedVirtualCenter, &Arc<SimulatedDatacenter>)> {
        self.centers
            .iter()
            .flat_map(|vc| vc.datacenters.iter().map(move |dc| (vc, dc)))
    }

    fn instance(vc: &SimulatedVirtualCenter, dc: &Arc<SimulatedDatacenter>) -> BackendInstance {
        let datacenter: DatacenterRef = dc.clone();
        BackendInstance::new(format!("{}:{}", vc.server, vc.port), datacenter)
    }
}

#[async_trait]
impl ConnectionManager for SimulatedConnectionManager {
    fn virtual_centers(&self) -> Vec<String> {
        self.centers.iter().map(|vc| vc.server.clone()).collect()
    }

    async fn api_version(&self, vc_server: &str) -> DriverResult<String> {
        self.faults.enter(Operation::ApiVersion).await?;

        self.centers
            .iter()
            .find(|vc| vc.server == vc_server)
            .map(|vc| vc.api_version.clone())
            .ok_or_else(|| DriverError::NotFound {
                kind: "VirtualCenter".into(),
                name: vc_server.into(),
            })
    }

    async fn resolve_by_zone(&self, query: &ZoneQuery) -> DriverResult<BackendInstance> {
        self.faults.enter(Operation::ResolveZone).await?;

        // Legacy single-zone deployments carry no zone tags at all
        if query.zone.is_empty() && query.region.is_empty() {
            let mut all = self.instances();
            return match (all.next(), all.next()) {
                (Some((vc, dc)), None) => Ok(Self::instance(vc, dc)),
                _ => Err(DriverError::NoZoneMatch {
                    zone: String::new(),
                    region: String::new(),
                }),
            };
        }

        self.instances()
            .find(|(_, dc)| dc.matches_zone(&query.zone, &query.region))
            .map(|(vc, dc)| {
                debug!(
                    "Zone {}={} {}={} resolved to {}/{}",
                    query.zone_category, query.zone, query.region_category, query.region,
                    vc.server, dc.name
                );
                Self::instance(vc, dc)
            })
            .ok_or_else(|| DriverError::NoZoneMatch {
                zone: query.zone.clone(),
                region: query.region.clone(),
            })
    }

    async fn backend_instances(&self) -> DriverResult<Vec<BackendInstance>> {
        self.faults.enter(Operation::ListInstances).await?;
        Ok(self.instances().map(|(vc, dc)| Self::instance(vc, dc)).collect())
    }
}

// =============================================================================
// Datacenter
// =============================================================================

/// One datacenter of the simulated inventory
pub struct SimulatedDatacenter {
    name: String,
    zone: Option<String>,
    region: Option<String>,
    datastores: Vec<String>,
    clusters: BTreeMap<String, Vec<String>>,
    /// Disks in creation order
    disks: RwLock<Vec<FirstClassDisk>>,
    vms: BTreeMap<String, Arc<SimulatedVm>>,
    faults: Arc<FaultInjector>,
}

impl SimulatedDatacenter {
    pub fn from_config(config: &DatacenterConfig) -> Self {
        let faults = FaultInjector::new();
        let vms = config
            .nodes
            .iter()
            .map(|dns| (dns.clone(), Arc::new(SimulatedVm::new(dns, faults.clone()))))
            .collect();

        Self {
            name: config.name.clone(),
            zone: config.zone.clone(),
            region: config.region.clone(),
            datastores: config.datastores.clone(),
            clusters: config
                .datastore_clusters
                .iter()
                .map(|c| (c.name.clone(), c.datastores.clone()))
                .collect(),
            disks: RwLock::new(Vec::new()),
            vms,
            faults,
        }
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    pub fn vm(&self, dns_name: &str) -> Option<Arc<SimulatedVm>> {
        self.vms.get(dns_name).cloned()
    }

    /// Place a pre-built descriptor directly into the inventory
    pub fn insert_disk(&self, disk: FirstClassDisk) {
        self.disks.write().push(disk);
    }

    pub fn disk_count(&self) -> usize {
        self.disks.read().len()
    }

    pub fn disk(&self, id: &str) -> Option<FirstClassDisk> {
        self.disks.read().iter().find(|d| d.id == id).cloned()
    }

    fn matches_zone(&self, zone: &str, region: &str) -> bool {
        let zone_ok = zone.is_empty() || self.zone.as_deref() == Some(zone);
        let region_ok = region.is_empty() || self.region.as_deref() == Some(region);
        zone_ok && region_ok
    }

    fn in_pool(disk: &FirstClassDisk, pool: &StoragePoolRef) -> bool {
        match (&disk.parent, pool.parent_type) {
            (DiskParent::Datastore { datastore }, ParentType::Datastore) => *datastore == pool.name,
            (DiskParent::DatastoreCluster { cluster, .. }, ParentType::DatastoreCluster) => {
                *cluster == pool.name
            }
            _ => false,
        }
    }

    fn placement(&self, pool: &StoragePoolRef) -> DriverResult<DiskParent> {
        match pool.parent_type {
            ParentType::Datastore => {
                if self.datastores.iter().any(|ds| *ds == pool.name) {
                    Ok(DiskParent::Datastore {
                        datastore: pool.name.clone(),
                    })
                } else {
                    Err(DriverError::NotFound {
                        kind: "Datastore".into(),
                        name: pool.name.clone(),
                    })
                }
            }
            ParentType::DatastoreCluster => self
                .clusters
                .get(&pool.name)
                .and_then(|members| members.first())
                .map(|datastore| DiskParent::DatastoreCluster {
                    cluster: pool.name.clone(),
                    datastore: datastore.clone(),
                })
                .ok_or_else(|| DriverError::NotFound {
                    kind: "DatastoreCluster".into(),
                    name: pool.name.clone(),
                }),
        }
    }
}

#[async_trait]
impl Datacenter for SimulatedDatacenter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_disk_by_name(
        &self,
        pool: &StoragePoolRef,
        name: &str,
    ) -> DriverResult<Option<FirstClassDisk>> {
        self.faults.enter(Operation::FindDiskByName).await?;
        Ok(self
            .disks
            .read()
            .iter()
            .find(|d| d.name == name && Self::in_pool(d, pool))
            .cloned())
    }

    async fn find_disk_by_id(&self, id: &str) -> DriverResult<Option<FirstClassDisk>> {
        self.faults.enter(Operation::FindDiskById).await?;
        Ok(self.disks.read().iter().find(|d| d.id == id).cloned())
    }

    async fn create_disk(
        &self,
        pool: &StoragePoolRef,
        name: &str,
        size_mb: u64,
    ) -> DriverResult<()> {
        self.faults.enter(Operation::CreateDisk).await?;

        let parent = self.placement(pool)?;
        let id = uuid::Uuid::new_v4().to_string();
        let file_path = format!(
            "[{}] fcd/{}.vmdk",
            parent.owning_datastore(),
            id.replace('-', "")
        );

        info!(
            "Creating first class disk {} ({} MB) in {} -> {}",
            name, size_mb, pool, id
        );

        self.disks.write().push(FirstClassDisk {
            id,
            name: name.to_string(),
            capacity_mb: size_mb,
            parent,
            backing: DiskBacking::File { file_path },
        });

        Ok(())
    }

    async fn delete_disk(&self, pool: &StoragePoolRef, id: &str) -> DriverResult<()> {
        self.faults.enter(Operation::DeleteDisk).await?;

        let mut disks = self.disks.write();
        match disks.iter().position(|d| d.id == id && Self::in_pool(d, pool)) {
            Some(index) => {
                disks.remove(index);
                info!("Deleted first class disk {} from {}", id, pool);
                Ok(())
            }
            None => Err(DriverError::NotFound {
                kind: "FirstClassDisk".into(),
                name: id.into(),
            }),
        }
    }

    async fn list_disks(&self) -> DriverResult<Vec<FirstClassDisk>> {
        self.faults.enter(Operation::ListDisks).await?;
        Ok(self.disks.read().clone())
    }

    async fn find_vm_by_dns_name(&self, dns_name: &str) -> DriverResult<VirtualMachineRef> {
        self.faults.enter(Operation::FindVm).await?;
        match self.vms.get(dns_name) {
            Some(vm) => {
                let vm: VirtualMachineRef = vm.clone();
                Ok(vm)
            }
            None => Err(DriverError::NotFound {
                kind: "VirtualMachine".into(),
                name: dns_name.into(),
            }),
        }
    }
}

// =============================================================================
// Virtual Machine
// =============================================================================

/// Node VM of the simulated inventory
pub struct SimulatedVm {
    name: String,
    /// Backing file path -> attached disk UUID
    attached: RwLock<BTreeMap<String, String>>,
    faults: Arc<FaultInjector>,
}

impl SimulatedVm {
    fn new(name: &str, faults: Arc<FaultInjector>) -> Self {
        Self {
            name: name.to_string(),
            attached: RwLock::new(BTreeMap::new()),
            faults,
        }
    }

    pub fn attached_uuid(&self, file_path: &str) -> Option<String> {
        self.attached.read().get(file_path).cloned()
    }

    pub fn attached_count(&self) -> usize {
        self.attached.read().len()
    }
}

#[async_trait]
impl VirtualMachine for SimulatedVm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach_disk(&self, file_path: &str, options: &VolumeOptions) -> DriverResult<String> {
        self.faults.enter(Operation::AttachDisk).await?;

        let mut attached = self.attached.write();
        if let Some(uuid) = attached.get(file_path) {
            debug!("{} already attached to {} as {}", file_path, self.name, uuid);
            return Ok(uuid.clone());
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        info!(
            "Attaching {} to {} on {} controller as {}",
            file_path,
            self.name,
            options.scsi_controller_type.as_str(),
            uuid
        );
        attached.insert(file_path.to_string(), uuid.clone());
        Ok(uuid)
    }

    async fn detach_disk(&self, file_path: &str) -> DriverResult<()> {
        self.faults.enter(Operation::DetachDisk).await?;

        match self.attached.write().remove(file_path) {
            Some(_) => {
                info!("Detached {} from {}", file_path, self.name);
                Ok(())
            }
            None => Err(DriverError::NotFound {
                kind: "VirtualDevice".into(),
                name: file_path.into(),
            }),
        }
    }
}
