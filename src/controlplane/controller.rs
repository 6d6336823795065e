//! CSI Controller
//!
//! The request-handling surface. Validates input, orchestrates the zone
//! resolver, volume store, attach coordinator and paginator, and maps
//! results to CSI responses.

use crate::config::Config;
use crate::controlplane::attach::{AttachCoordinator, DEFAULT_CONTROLLER_TYPE};
use crate::controlplane::context::RequestContext;
use crate::controlplane::csi::{
    ControllerCapability, ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest,
    ControllerUnpublishVolumeResponse, CreateSnapshotRequest, CreateVolumeRequest,
    CreateVolumeResponse, DeleteSnapshotRequest, DeleteVolumeRequest, DeleteVolumeResponse,
    GetCapacityRequest, GetCapacityResponse, ListSnapshotsRequest, ListVolumesRequest,
    ListVolumesResponse, ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse,
    Volume,
};
use crate::controlplane::metrics::ControllerMetrics;
use crate::controlplane::paginator::ListPaginator;
use crate::controlplane::volume_store::{CreateOutcome, VolumeStore};
use crate::controlplane::zone::{Placement, ZoneResolver};
use crate::domain::disk::{
    round_up_to_gib_in_mb, FirstClassDisk, ParentType, StoragePoolRef, ATTRIBUTE_PAGE83_DATA,
    ATTRIBUTE_PARENT_NAME, ATTRIBUTE_PARENT_TYPE, ATTRIBUTE_REGION, ATTRIBUTE_ZONE,
    DEFAULT_GB_DISK_SIZE, GB_IN_BYTES, MB_IN_BYTES,
};
use crate::domain::ports::{BackendInstance, ConnectionManagerRef};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// First API version with first-class disk support
const MIN_API_VERSION: (u32, u32) = (6, 5);

/// Capabilities advertised by ControllerGetCapabilities
pub const CONTROLLER_CAPABILITIES: [ControllerCapability; 3] = [
    ControllerCapability::ListVolumes,
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
];

/// CSI controller service for first-class disks
pub struct Controller {
    connections: ConnectionManagerRef,
    zones: ZoneResolver,
    volumes: VolumeStore,
    attacher: AttachCoordinator,
    paginator: ListPaginator,
    metrics: ControllerMetrics,
}

impl Controller {
    /// Create a controller owning the given connection layer
    pub fn new(config: &Config, connections: ConnectionManagerRef) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            zones: ZoneResolver::new(connections.clone(), config.labels.clone()),
            volumes: VolumeStore::new(connections.clone(), config.controller.serialize_creates),
            attacher: AttachCoordinator::new(),
            paginator: ListPaginator::new(connections.clone()),
            metrics: ControllerMetrics::new()?,
            connections,
        }))
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Verify every endpoint supports first-class disks
    pub async fn init(&self, ctx: &RequestContext) -> Result<()> {
        for vc in self.connections.virtual_centers() {
            let version = ctx
                .run("APIVersion", self.connections.api_version(&vc))
                .await?
                .map_err(|e| {
                    error!("APIVersion failed err={}", e);
                    Error::Configuration(format!("APIVersion({}) failed: {}", vc, e))
                })?;

            if let Err(e) = check_api(&version) {
                error!("checkAPI failed for {} err={}", vc, e);
                return Err(e);
            }
            info!("Virtual center {} reports API version {}", vc, version);
        }
        Ok(())
    }

    async fn instrument<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.metrics.observe(operation, started.elapsed(), &result);
        result
    }

    // =========================================================================
    // CreateVolume
    // =========================================================================

    pub async fn create_volume(
        &self,
        ctx: &RequestContext,
        req: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse> {
        self.instrument("CreateVolume", self.do_create_volume(ctx, req))
            .await
    }

    async fn do_create_volume(
        &self,
        ctx: &RequestContext,
        req: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse> {
        let params = &req.parameters;

        if params.is_empty() {
            return Err(invalid("Create parameters is a required parameter."));
        } else if req.name.is_empty() {
            return Err(invalid("Volume name is a required parameter."));
        }
        let parent_type = required_param(params, ATTRIBUTE_PARENT_TYPE)?;
        let parent_name = required_param(params, ATTRIBUTE_PARENT_NAME)?;

        let size_mb = requested_size_mb(&req)?;
        let pool = StoragePoolRef {
            parent_type: ParentType::from_parameter(parent_type),
            name: parent_name.to_string(),
        };
        let zone = param(params, ATTRIBUTE_ZONE);
        let region = param(params, ATTRIBUTE_REGION);

        info!(
            "CreateVolume name={} size_mb={} pool={} zone={} region={}",
            req.name, size_mb, pool, zone, region
        );

        let placement = Placement::new(req.accessibility_requirements.as_ref(), zone, region);
        let instance = self.zones.resolve(ctx, placement).await?;

        let outcome = self
            .volumes
            .create_or_get(ctx, &instance, &pool, &req.name, size_mb)
            .await?;
        if let CreateOutcome::Existing(disk) = &outcome {
            info!("CreateVolume {} reused existing disk {}", req.name, disk.id);
        }

        Ok(CreateVolumeResponse {
            volume: to_volume(&instance, outcome.disk())?,
        })
    }

    // =========================================================================
    // DeleteVolume
    // =========================================================================

    pub async fn delete_volume(
        &self,
        ctx: &RequestContext,
        req: DeleteVolumeRequest,
    ) -> Result<DeleteVolumeResponse> {
        self.instrument("DeleteVolume", self.do_delete_volume(ctx, req))
            .await
    }

    async fn do_delete_volume(
        &self,
        ctx: &RequestContext,
        req: DeleteVolumeRequest,
    ) -> Result<DeleteVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(invalid("Volume ID is a required parameter."));
        }

        let (instance, disk) = match self.volumes.resolve_by_id(ctx, &req.volume_id).await {
            Ok(found) => found,
            Err(Error::DiskIdNotFound { .. }) => {
                warn!(
                    "Failed to retrieve VC/DC based on FCDID {}. Treating volume as deleted.",
                    req.volume_id
                );
                return Ok(DeleteVolumeResponse {});
            }
            Err(e) => return Err(lookup_failed("DeleteVolume", &req.volume_id, e)),
        };

        self.volumes
            .delete(ctx, &instance, &disk.parent.pool(), &req.volume_id)
            .await?;

        Ok(DeleteVolumeResponse {})
    }

    // =========================================================================
    // ControllerPublishVolume / ControllerUnpublishVolume
    // =========================================================================

    pub async fn controller_publish_volume(
        &self,
        ctx: &RequestContext,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse> {
        self.instrument("ControllerPublishVolume", self.do_publish(ctx, req))
            .await
    }

    async fn do_publish(
        &self,
        ctx: &RequestContext,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse> {
        require_ids(&req.volume_id, &req.node_id)?;

        let (instance, disk) = self
            .volumes
            .resolve_by_id(ctx, &req.volume_id)
            .await
            .map_err(|e| lookup_failed("ControllerPublishVolume", &req.volume_id, e))?;

        let node = self.attacher.resolve_node(ctx, &instance, &req.node_id).await?;
        let disk_uuid = self
            .attacher
            .attach(ctx, &node, &disk, DEFAULT_CONTROLLER_TYPE)
            .await?;

        let mut publish_context = disk.attributes(&instance.vc_server, instance.datacenter_name());
        publish_context.insert(ATTRIBUTE_PAGE83_DATA.to_string(), disk_uuid);

        Ok(ControllerPublishVolumeResponse { publish_context })
    }

    pub async fn controller_unpublish_volume(
        &self,
        ctx: &RequestContext,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<ControllerUnpublishVolumeResponse> {
        self.instrument("ControllerUnpublishVolume", self.do_unpublish(ctx, req))
            .await
    }

    async fn do_unpublish(
        &self,
        ctx: &RequestContext,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<ControllerUnpublishVolumeResponse> {
        require_ids(&req.volume_id, &req.node_id)?;

        let (instance, disk) = self
            .volumes
            .resolve_by_id(ctx, &req.volume_id)
            .await
            .map_err(|e| lookup_failed("ControllerUnpublishVolume", &req.volume_id, e))?;

        let node = self.attacher.resolve_node(ctx, &instance, &req.node_id).await?;
        self.attacher.detach(ctx, &node, &disk).await?;

        Ok(ControllerUnpublishVolumeResponse {})
    }

    // =========================================================================
    // ListVolumes
    // =========================================================================

    pub async fn list_volumes(
        &self,
        ctx: &RequestContext,
        req: ListVolumesRequest,
    ) -> Result<ListVolumesResponse> {
        self.instrument(
            "ListVolumes",
            self.paginator.page(ctx, &req.starting_token, req.max_entries),
        )
        .await
    }

    // =========================================================================
    // Capabilities & Stubs
    // =========================================================================

    pub fn controller_get_capabilities(&self) -> ControllerGetCapabilitiesResponse {
        ControllerGetCapabilitiesResponse {
            capabilities: CONTROLLER_CAPABILITIES.to_vec(),
        }
    }

    pub async fn validate_volume_capabilities(
        &self,
        _ctx: &RequestContext,
        _req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse> {
        Ok(ValidateVolumeCapabilitiesResponse::default())
    }

    pub async fn get_capacity(
        &self,
        _ctx: &RequestContext,
        _req: GetCapacityRequest,
    ) -> Result<GetCapacityResponse> {
        Ok(GetCapacityResponse::default())
    }

    pub async fn create_snapshot(
        &self,
        _ctx: &RequestContext,
        _req: CreateSnapshotRequest,
    ) -> Result<()> {
        Err(Error::Unimplemented("CreateSnapshot".into()))
    }

    pub async fn delete_snapshot(
        &self,
        _ctx: &RequestContext,
        _req: DeleteSnapshotRequest,
    ) -> Result<()> {
        Err(Error::Unimplemented("DeleteSnapshot".into()))
    }

    pub async fn list_snapshots(
        &self,
        _ctx: &RequestContext,
        _req: ListSnapshotsRequest,
    ) -> Result<()> {
        Err(Error::Unimplemented("ListSnapshots".into()))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn invalid(msg: &str) -> Error {
    error!("{}", msg);
    Error::InvalidArgument(msg.to_string())
}

fn param<'a>(params: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or_default()
}

fn required_param<'a>(params: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    match param(params, key) {
        "" => Err(invalid(&format!(
            "Volume parameter {} is a required parameter.",
            key
        ))),
        value => Ok(value),
    }
}

fn require_ids(volume_id: &str, node_id: &str) -> Result<()> {
    if volume_id.is_empty() {
        Err(invalid("Volume ID is a required parameter."))
    } else if node_id.is_empty() {
        Err(invalid("Node ID is a required parameter."))
    } else {
        Ok(())
    }
}

/// Requested size rounded up to whole GiB, in MB
///
/// The rounded size must still be reportable as a signed byte count.
fn requested_size_mb(req: &CreateVolumeRequest) -> Result<u64> {
    let required = req.capacity_range.as_ref().map_or(0, |r| r.required_bytes);
    let size_mb = match u64::try_from(required) {
        Ok(0) => round_up_to_gib_in_mb(DEFAULT_GB_DISK_SIZE * GB_IN_BYTES),
        Ok(bytes) => round_up_to_gib_in_mb(bytes),
        Err(_) => {
            return Err(invalid(&format!(
                "Required bytes {} must not be negative.",
                required
            )))
        }
    };

    let fits = size_mb
        .checked_mul(MB_IN_BYTES)
        .is_some_and(|bytes| i64::try_from(bytes).is_ok());
    if !fits {
        return Err(invalid(&format!(
            "Required bytes {} exceeds the maximum volume size.",
            required
        )));
    }
    Ok(size_mb)
}

fn lookup_failed(operation: &str, volume_id: &str, e: Error) -> Error {
    if e.is_aborted() {
        warn!("{} aborted for volume {}: {}", operation, volume_id, e);
        return e;
    }
    let msg = format!("WhichVCandDCByFCDId({}) failed. Err: {}", volume_id, e);
    error!("{}", msg);
    Error::Internal(msg)
}

fn to_volume(instance: &BackendInstance, disk: &FirstClassDisk) -> Result<Volume> {
    Volume::from_disk(disk, &instance.vc_server, instance.datacenter_name())
}

/// Reject endpoints older than the first-class disk API
pub fn check_api(version: &str) -> Result<()> {
    let mut parts = version.trim().split('.');
    let parse = |part: Option<&str>| -> Result<u32> {
        part.unwrap_or("0").parse::<u32>().map_err(|_| {
            Error::Configuration(format!("unparseable API version {:?}", version))
        })
    };

    let major = parse(parts.next())?;
    let minor = parse(parts.next())?;

    if (major, minor) < MIN_API_VERSION {
        return Err(Error::Configuration(format!(
            "API version {} does not support first class disks (requires {}.{}+)",
            version, MIN_API_VERSION.0, MIN_API_VERSION.1
        )));
    }
    Ok(())
}
