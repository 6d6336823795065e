//! Attach Coordinator
//!
//! Resolves node VMs and attaches or detaches a disk's backing file. Node
//! and backend failures are returned as the driver reported them.

use crate::controlplane::context::RequestContext;
use crate::domain::disk::{FirstClassDisk, ScsiControllerType, VolumeOptions};
use crate::domain::ports::{BackendInstance, VirtualMachineRef};
use crate::error::{Error, Result};
use tracing::{error, info};

/// Controller type every publish attaches through
pub const DEFAULT_CONTROLLER_TYPE: ScsiControllerType = ScsiControllerType::ParaVirtual;

#[derive(Debug, Default)]
pub struct AttachCoordinator;

impl AttachCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a compute node by its external (DNS) identifier
    pub async fn resolve_node(
        &self,
        ctx: &RequestContext,
        instance: &BackendInstance,
        node_id: &str,
    ) -> Result<VirtualMachineRef> {
        ctx.run("GetVMByDNSName", instance.datacenter.find_vm_by_dns_name(node_id))
            .await?
            .map_err(|e| {
                error!("GetVMByDNSName({}) failed. Err: {}", node_id, e);
                Error::Driver(e)
            })
    }

    /// Attach the disk's backing file, returning the attachment handle
    pub async fn attach(
        &self,
        ctx: &RequestContext,
        node: &VirtualMachineRef,
        disk: &FirstClassDisk,
        controller_type: ScsiControllerType,
    ) -> Result<String> {
        let file_path = backing_file(disk)?;
        let options = VolumeOptions {
            scsi_controller_type: controller_type,
        };

        let disk_uuid = ctx
            .run("AttachDisk", node.attach_disk(file_path, &options))
            .await?
            .map_err(|e| {
                error!("AttachDisk({} = {}) failed. Err: {}", disk.name, file_path, e);
                Error::Driver(e)
            })?;

        info!("AttachDisk({}) succeeded with UUID: {}", file_path, disk_uuid);
        Ok(disk_uuid)
    }

    /// Detach the virtual disk backed by the disk's file
    pub async fn detach(
        &self,
        ctx: &RequestContext,
        node: &VirtualMachineRef,
        disk: &FirstClassDisk,
    ) -> Result<()> {
        let file_path = backing_file(disk)?;

        ctx.run("DetachDisk", node.detach_disk(file_path))
            .await?
            .map_err(|e| {
                error!("DetachDisk({} = {}) failed. Err: {}", disk.name, file_path, e);
                Error::Driver(e)
            })?;

        info!("DetachDisk({}) from {} succeeded", file_path, node.name());
        Ok(())
    }
}

fn backing_file(disk: &FirstClassDisk) -> Result<&str> {
    disk.file_path().ok_or_else(|| {
        let msg = format!("disk {} ({}) is not file-backed", disk.name, disk.id);
        error!("{}", msg);
        Error::ContractViolation(msg)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controlplane::backends::simulator::{Operation, SimulatedConnectionManager};
    use crate::domain::disk::{DiskBacking, DiskParent};
    use crate::domain::ports::ConnectionManager;
    use crate::error::{Code, DriverError};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn inventory() -> Arc<SimulatedConnectionManager> {
        let config = Config::from_yaml(
            r#"
virtualCenters:
  vc1:
    datacenters:
      - name: dc-a
        datastores: [ds-1]
        nodes: [node-1.example.com]
"#,
        )
        .unwrap();
        Arc::new(SimulatedConnectionManager::from_config(&config))
    }

    fn disk(backing: DiskBacking) -> FirstClassDisk {
        FirstClassDisk {
            id: "fcd-1".into(),
            name: "pvc-1".into(),
            capacity_mb: 1024,
            parent: DiskParent::Datastore {
                datastore: "ds-1".into(),
            },
            backing,
        }
    }

    #[tokio::test]
    async fn test_attach_and_detach() {
        let cm = inventory();
        let instance = cm.backend_instances().await.unwrap().remove(0);
        let ctx = RequestContext::background();
        let coordinator = AttachCoordinator::new();

        let node = coordinator
            .resolve_node(&ctx, &instance, "node-1.example.com")
            .await
            .unwrap();
        let disk = disk(DiskBacking::File {
            file_path: "[ds-1] fcd/abc.vmdk".into(),
        });

        let handle = coordinator
            .attach(&ctx, &node, &disk, DEFAULT_CONTROLLER_TYPE)
            .await
            .unwrap();
        let vm = cm.datacenter("vc1", "dc-a").unwrap().vm("node-1.example.com").unwrap();
        assert_eq!(vm.attached_uuid("[ds-1] fcd/abc.vmdk"), Some(handle));

        coordinator.detach(&ctx, &node, &disk).await.unwrap();
        assert_eq!(vm.attached_count(), 0);
    }

    #[tokio::test]
    async fn test_non_file_backing_is_contract_violation() {
        let cm = inventory();
        let instance = cm.backend_instances().await.unwrap().remove(0);
        let ctx = RequestContext::background();
        let coordinator = AttachCoordinator::new();
        let node = coordinator
            .resolve_node(&ctx, &instance, "node-1.example.com")
            .await
            .unwrap();

        let err = coordinator
            .attach(
                &ctx,
                &node,
                &disk(DiskBacking::Other { kind: "rdm".into() }),
                DEFAULT_CONTROLLER_TYPE,
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::ContractViolation(_));
        assert_eq!(
            cm.datacenter("vc1", "dc-a").unwrap().faults().calls(Operation::AttachDisk),
            0
        );
    }

    #[tokio::test]
    async fn test_node_errors_pass_through() {
        let cm = inventory();
        let instance = cm.backend_instances().await.unwrap().remove(0);
        let ctx = RequestContext::background();
        let coordinator = AttachCoordinator::new();

        let err = coordinator
            .resolve_node(&ctx, &instance, "node-9.example.com")
            .await
            .err()
            .unwrap();
        assert_matches!(err, Error::Driver(DriverError::NotFound { .. }));

        let node = coordinator
            .resolve_node(&ctx, &instance, "node-1.example.com")
            .await
            .unwrap();
        let injected = DriverError::api("AttachDisk", "no free SCSI slot");
        cm.datacenter("vc1", "dc-a")
            .unwrap()
            .faults()
            .fail(Operation::AttachDisk, injected.clone());

        let err = coordinator
            .attach(
                &ctx,
                &node,
                &disk(DiskBacking::File {
                    file_path: "[ds-1] fcd/abc.vmdk".into(),
                }),
                DEFAULT_CONTROLLER_TYPE,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
        assert_matches!(err, Error::Driver(e) if e == injected);
    }
}
