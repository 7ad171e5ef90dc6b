//! CSI Controller Service Implementation
//!
//! Handles the volume lifecycle against the block storage provider: create,
//! delete, attach (publish), detach (unpublish), expand, list and capacity.
//!
//! State-changing calls hold a per-volume key for their whole duration (the
//! volume name while creating, the volume id otherwise). A second call for a
//! held key is rejected with `ABORTED` so the orchestrator retries it later.
//! Asynchronous provider effects are confirmed by polling until the
//! request's deadline.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, Volume, VolumeBackend, VolumeStatus, find_volume_by_label};
use crate::config::DriverConfig;
use crate::csi;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::metrics::{self, OperationTimer};
use crate::poll::{PollBudget, PollError};
use crate::types::{
    GIB, PUBLISH_CONTEXT_DEVICE_PATH, TOPOLOGY_REGION_KEY, VOLUME_CONTEXT_MOUNT_ID, VolumeSize,
    device_path_for_mount_id,
};

/// Page size used when ListVolumes does not ask for one
const DEFAULT_LIST_PAGE_SIZE: u32 = 100;

/// CSI Controller Service
///
/// Implements the CSI Controller service which handles:
/// - Volume creation and deletion
/// - Volume attach and detach
/// - Volume expansion
/// - Listing, capacity and capability reporting
pub struct ControllerService {
    config: Arc<DriverConfig>,
    backend: Arc<dyn VolumeBackend>,
    locks: KeyedLocks,
    shutdown: CancellationToken,
}

impl ControllerService {
    pub fn new(
        config: Arc<DriverConfig>,
        backend: Arc<dyn VolumeBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            backend,
            locks: KeyedLocks::new(),
            shutdown,
        }
    }

    fn budget(&self, metadata: &MetadataMap) -> PollBudget {
        PollBudget::for_request(
            metadata,
            self.config.timeout,
            self.config.poll_interval,
            self.shutdown.clone(),
        )
    }

    /// Take the per-volume key or reject the call.
    fn lock(&self, key: &str, operation: &str) -> Result<KeyGuard<'_>, Status> {
        self.locks.try_acquire(key).ok_or_else(|| {
            metrics::record_lock_contention(operation);
            warn!(key = %key, operation = %operation, "Operation already in progress");
            Status::aborted(format!(
                "an operation for '{}' is already in progress, retry later",
                key
            ))
        })
    }

    /// Map a capacity range onto a provider size tier.
    fn volume_size(capacity_range: Option<&csi::CapacityRange>) -> Result<VolumeSize, Status> {
        let Some(range) = capacity_range else {
            return Ok(VolumeSize::DEFAULT);
        };
        VolumeSize::from_range(range.required_bytes, range.limit_bytes).map_err(|e| {
            if e.is_malformed() {
                Status::invalid_argument(e.to_string())
            } else {
                Status::out_of_range(e.to_string())
            }
        })
    }

    /// Region of the first topology segment naming one, preferred before
    /// requisite, else this driver's region.
    fn requested_region(&self, requirement: Option<&csi::TopologyRequirement>) -> String {
        requirement
            .and_then(|r| {
                r.preferred
                    .iter()
                    .chain(r.requisite.iter())
                    .find_map(|t| t.segments.get(TOPOLOGY_REGION_KEY))
            })
            .cloned()
            .unwrap_or_else(|| self.config.region.clone())
    }

    /// Check requested capabilities. Only single-node mount access is supported.
    fn check_capabilities(capabilities: &[csi::VolumeCapability]) -> Result<(), String> {
        use csi::volume_capability::access_mode::Mode;

        let mut unsupported_reasons = Vec::new();
        for cap in capabilities {
            match &cap.access_type {
                Some(csi::volume_capability::AccessType::Mount(_)) => {}
                Some(csi::volume_capability::AccessType::Block(_)) => {
                    unsupported_reasons.push("raw block access is not supported".to_string());
                }
                None => {
                    unsupported_reasons
                        .push("Volume capability must specify access type".to_string());
                }
            }

            let mode = cap.access_mode.as_ref().map(|m| m.mode).unwrap_or_default();
            match Mode::try_from(mode) {
                Ok(Mode::SingleNodeWriter)
                | Ok(Mode::SingleNodeReaderOnly)
                | Ok(Mode::SingleNodeSingleWriter) => {}
                Ok(other) => {
                    unsupported_reasons
                        .push(format!("access mode {} is not supported", other.as_str_name()));
                }
                Err(_) => {
                    unsupported_reasons.push(format!("Unknown access mode: {}", mode));
                }
            }
        }

        if unsupported_reasons.is_empty() {
            Ok(())
        } else {
            Err(unsupported_reasons.join("; "))
        }
    }

    /// Convert a provider volume to a CSI volume.
    fn to_csi_volume(volume: &Volume) -> csi::Volume {
        let mut volume_context = HashMap::new();
        volume_context.insert(
            VOLUME_CONTEXT_MOUNT_ID.to_string(),
            volume.mount_id.clone(),
        );

        csi::Volume {
            capacity_bytes: volume.size_gb as i64 * GIB,
            volume_id: volume.id.clone(),
            volume_context,
            content_source: None,
            accessible_topology: vec![csi::Topology {
                segments: HashMap::from([(
                    TOPOLOGY_REGION_KEY.to_string(),
                    volume.region.clone(),
                )]),
            }],
        }
    }

    fn publish_context(volume: &Volume) -> HashMap<String, String> {
        HashMap::from([(
            PUBLISH_CONTEXT_DEVICE_PATH.to_string(),
            device_path_for_mount_id(&volume.mount_id),
        )])
    }

    /// Re-read a volume until `done` accepts it.
    async fn wait_for<F>(
        &self,
        budget: &PollBudget,
        operation: &str,
        volume_id: &str,
        done: F,
    ) -> Result<Volume, PollError>
    where
        F: Fn(&Volume) -> Result<bool, BackendError> + Send + Sync,
    {
        let backend = self.backend.as_ref();
        let done = &done;
        budget
            .poll_until(operation, move || async move {
                let volume = backend.get_volume(volume_id).await?;
                Ok(done(&volume)?.then_some(volume))
            })
            .await
    }

    async fn wait_until_ready(
        &self,
        budget: &PollBudget,
        volume_id: &str,
    ) -> Result<Volume, PollError> {
        self.wait_for(budget, "create_volume", volume_id, |v| match v.status {
            VolumeStatus::Error => Err(BackendError::InvalidResponse(format!(
                "volume {} failed to provision",
                v.id
            ))),
            status => Ok(status.is_ready()),
        })
        .await
    }

    async fn create(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let budget = self.budget(request.metadata());
        let req = request.into_inner();
        let name = &req.name;

        if name.is_empty() {
            return Err(Status::invalid_argument("Volume name is required"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument("Volume capabilities are required"));
        }
        Self::check_capabilities(&req.volume_capabilities).map_err(Status::invalid_argument)?;
        if req.volume_content_source.is_some() {
            return Err(Status::invalid_argument(
                "Creating volumes from snapshots or other volumes is not supported",
            ));
        }

        let size = Self::volume_size(req.capacity_range.as_ref())?;
        let region = self.requested_region(req.accessibility_requirements.as_ref());

        info!(name = %name, size = %size, region = %region, "CreateVolume request");

        let _guard = self.lock(name, "create_volume")?;

        if let Some(existing) = find_volume_by_label(self.backend.as_ref(), name).await? {
            if existing.size_gb != size.gb() || existing.region != region {
                warn!(
                    name = %name,
                    volume_id = %existing.id,
                    existing_size_gb = existing.size_gb,
                    existing_region = %existing.region,
                    "Volume exists with different parameters"
                );
                return Err(Status::already_exists(format!(
                    "volume '{}' already exists as {} with {}GiB in {}",
                    name, existing.id, existing.size_gb, existing.region
                )));
            }

            let volume = match existing.status {
                VolumeStatus::Creating => {
                    debug!(volume_id = %existing.id, "Existing volume still provisioning");
                    self.wait_until_ready(&budget, &existing.id).await?
                }
                status if status.is_ready() => existing,
                status => {
                    return Err(Status::failed_precondition(format!(
                        "volume '{}' ({}) is {}",
                        name, existing.id, status
                    )));
                }
            };

            info!(volume_id = %volume.id, name = %name, "Volume already exists");
            return Ok(Response::new(csi::CreateVolumeResponse {
                volume: Some(Self::to_csi_volume(&volume)),
            }));
        }

        let created = self
            .backend
            .create_volume(&region, size.gb(), name)
            .await
            .map_err(|e| {
                error!(error = %e, name = %name, "Failed to create volume");
                e
            })?;
        debug!(volume_id = %created.id, "Volume requested, waiting for it to become available");

        let volume = self.wait_until_ready(&budget, &created.id).await?;

        info!(
            volume_id = %volume.id,
            name = %name,
            size_gb = volume.size_gb,
            "Volume created successfully"
        );

        Ok(Response::new(csi::CreateVolumeResponse {
            volume: Some(Self::to_csi_volume(&volume)),
        }))
    }

    async fn delete(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        info!(volume_id = %volume_id, "DeleteVolume request");

        let _guard = self.lock(volume_id, "delete_volume")?;

        let volume = match self.backend.get_volume(volume_id).await {
            Ok(v) => v,
            Err(e) if e.is_not_found() => {
                info!(volume_id = %volume_id, "Volume not found, treating as already deleted");
                return Ok(Response::new(csi::DeleteVolumeResponse {}));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(node_id) = &volume.attached_to {
            return Err(Status::failed_precondition(format!(
                "volume {} is still attached to {}",
                volume_id, node_id
            )));
        }

        match self.backend.delete_volume(volume_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(volume_id = %volume_id, "Volume disappeared during delete");
            }
            Err(e) => {
                error!(error = %e, volume_id = %volume_id, "Failed to delete volume");
                return Err(e.into());
            }
        }

        info!(volume_id = %volume_id, "Volume deleted successfully");
        Ok(Response::new(csi::DeleteVolumeResponse {}))
    }

    async fn publish(
        &self,
        request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        let budget = self.budget(request.metadata());
        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let node_id = &req.node_id;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }
        if node_id.is_empty() {
            return Err(Status::invalid_argument("Node ID is required"));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("Volume capability is required"))?;
        Self::check_capabilities(std::slice::from_ref(capability))
            .map_err(Status::invalid_argument)?;

        info!(volume_id = %volume_id, node_id = %node_id, "ControllerPublishVolume request");

        let _guard = self.lock(volume_id, "controller_publish_volume")?;

        let volume = self.backend.get_volume(volume_id).await?;
        self.backend.get_instance(node_id).await?;

        if volume.is_attached_to(node_id) {
            info!(volume_id = %volume_id, node_id = %node_id, "Volume already attached");
            return Ok(Response::new(csi::ControllerPublishVolumeResponse {
                publish_context: Self::publish_context(&volume),
            }));
        }
        if let Some(other) = &volume.attached_to {
            return Err(Status::failed_precondition(format!(
                "volume {} is attached to another node ({})",
                volume_id, other
            )));
        }
        if !volume.status.is_ready() {
            return Err(Status::failed_precondition(format!(
                "volume {} is {}",
                volume_id, volume.status
            )));
        }

        self.backend
            .attach_volume(volume_id, node_id)
            .await
            .map_err(|e| {
                error!(error = %e, volume_id = %volume_id, node_id = %node_id, "Failed to attach volume");
                e
            })?;

        let attached = self
            .wait_for(&budget, "controller_publish_volume", volume_id, |v| {
                match &v.attached_to {
                    Some(n) if n == node_id => Ok(true),
                    Some(other) => Err(BackendError::AlreadyAttached {
                        volume_id: v.id.clone(),
                        node_id: other.clone(),
                    }),
                    None => Ok(false),
                }
            })
            .await;

        let volume = match attached {
            Ok(v) => v,
            Err(e @ (PollError::DeadlineExceeded { .. } | PollError::Cancelled { .. })) => {
                // Withdraw the attach so no half-finished attachment outlives the call.
                warn!(volume_id = %volume_id, node_id = %node_id, error = %e, "Attach not confirmed, detaching");
                if let Err(detach) = self.backend.detach_volume(volume_id).await {
                    error!(volume_id = %volume_id, error = %detach, "Best-effort detach failed");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        info!(volume_id = %volume_id, node_id = %node_id, "Volume attached successfully");
        Ok(Response::new(csi::ControllerPublishVolumeResponse {
            publish_context: Self::publish_context(&volume),
        }))
    }

    async fn unpublish(
        &self,
        request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        let budget = self.budget(request.metadata());
        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let node_id = &req.node_id;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        info!(volume_id = %volume_id, node_id = %node_id, "ControllerUnpublishVolume request");

        let _guard = self.lock(volume_id, "controller_unpublish_volume")?;
        let done = || Ok(Response::new(csi::ControllerUnpublishVolumeResponse {}));

        let volume = match self.backend.get_volume(volume_id).await {
            Ok(v) => v,
            Err(e) if e.is_not_found() => {
                info!(volume_id = %volume_id, "Volume not found, treating as detached");
                return done();
            }
            Err(e) => return Err(e.into()),
        };

        match &volume.attached_to {
            None => {
                info!(volume_id = %volume_id, "Volume not attached");
                return done();
            }
            // An empty node id means "detach from wherever it is".
            Some(current) if !node_id.is_empty() && current != node_id => {
                info!(volume_id = %volume_id, attached_to = %current, "Volume attached to a different node");
                return done();
            }
            Some(_) => {}
        }

        match self.backend.detach_volume(volume_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return done(),
            Err(e) => {
                error!(error = %e, volume_id = %volume_id, "Failed to detach volume");
                return Err(e.into());
            }
        }

        match self
            .wait_for(&budget, "controller_unpublish_volume", volume_id, |v| {
                Ok(v.attached_to.is_none())
            })
            .await
        {
            Ok(_) => {}
            Err(PollError::Backend(e)) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        info!(volume_id = %volume_id, node_id = %node_id, "Volume detached successfully");
        done()
    }

    async fn expand(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }
        let capacity_range = req.capacity_range.as_ref().ok_or_else(|| {
            Status::invalid_argument("Capacity range is required for volume expansion")
        })?;
        let size = Self::volume_size(Some(capacity_range))?;

        info!(volume_id = %volume_id, size = %size, "ControllerExpandVolume request");

        let _guard = self.lock(volume_id, "controller_expand_volume")?;

        let volume = self.backend.get_volume(volume_id).await?;
        let capacity = if size.gb() > volume.size_gb {
            self.backend
                .resize_volume(volume_id, size.gb())
                .await
                .map_err(|e| {
                    error!(error = %e, volume_id = %volume_id, "Failed to resize volume");
                    e
                })?;
            info!(
                volume_id = %volume_id,
                from_gb = volume.size_gb,
                to_gb = size.gb(),
                "Volume expanded successfully"
            );
            size
        } else {
            debug!(volume_id = %volume_id, size_gb = volume.size_gb, "Volume already large enough");
            VolumeSize::from_gb(volume.size_gb)
        };

        Ok(Response::new(csi::ControllerExpandVolumeResponse {
            capacity_bytes: capacity.bytes(),
            // The filesystem is grown by NodeExpandVolume.
            node_expansion_required: true,
        }))
    }
}

#[tonic::async_trait]
impl csi::controller_server::Controller for ControllerService {
    /// Create a new volume.
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let timer = OperationTimer::new("create_volume");
        timer.finish(self.create(request).await)
    }

    /// Delete a volume.
    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let timer = OperationTimer::new("delete_volume");
        timer.finish(self.delete(request).await)
    }

    /// Attach a volume to a node.
    async fn controller_publish_volume(
        &self,
        request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("controller_publish_volume");
        timer.finish(self.publish(request).await)
    }

    /// Detach a volume from a node.
    async fn controller_unpublish_volume(
        &self,
        request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("controller_unpublish_volume");
        timer.finish(self.unpublish(request).await)
    }

    /// Validate volume capabilities.
    ///
    /// Returns "confirmed" only if ALL requested capabilities are supported.
    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument("Volume capabilities are required"));
        }

        info!(volume_id = %volume_id, "ValidateVolumeCapabilities request");

        // Verify the volume exists
        self.backend.get_volume(volume_id).await?;

        if let Err(message) = Self::check_capabilities(&req.volume_capabilities) {
            warn!(volume_id = %volume_id, message = %message, "Volume capabilities not supported");
            return Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message,
            }));
        }

        Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
            confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
                volume_context: req.volume_context,
                volume_capabilities: req.volume_capabilities,
                parameters: req.parameters,
                mutable_parameters: req.mutable_parameters,
            }),
            message: String::new(),
        }))
    }

    /// List volumes, one provider page per call.
    async fn list_volumes(
        &self,
        request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        let req = request.into_inner();

        info!(
            max_entries = req.max_entries,
            starting_token = %req.starting_token,
            "ListVolumes request"
        );

        let per_page = match req.max_entries {
            n if n < 0 => return Err(Status::invalid_argument("max_entries must not be negative")),
            0 => DEFAULT_LIST_PAGE_SIZE,
            n => n as u32,
        };
        let starting_token = if req.starting_token.is_empty() {
            None
        } else {
            Some(req.starting_token.as_str())
        };

        let page = self.backend.list_volumes(starting_token, per_page).await?;

        let entries: Vec<csi::list_volumes_response::Entry> = page
            .volumes
            .iter()
            .map(|v| csi::list_volumes_response::Entry {
                volume: Some(Self::to_csi_volume(v)),
                status: Some(csi::list_volumes_response::VolumeStatus {
                    published_node_ids: v.attached_to.iter().cloned().collect(),
                    volume_condition: None,
                }),
            })
            .collect();

        info!(count = entries.len(), "ListVolumes completed");

        Ok(Response::new(csi::ListVolumesResponse {
            entries,
            next_token: page.next_cursor.unwrap_or_default(),
        }))
    }

    /// Get storage capacity for a region.
    async fn get_capacity(
        &self,
        request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        let req = request.into_inner();
        let region = req
            .accessible_topology
            .as_ref()
            .and_then(|t| t.segments.get(TOPOLOGY_REGION_KEY))
            .cloned()
            .unwrap_or_else(|| self.config.region.clone());

        info!(region = %region, "GetCapacity request");

        if let Err(message) = Self::check_capabilities(&req.volume_capabilities) {
            debug!(message = %message, "No capacity for unsupported capabilities");
            return Ok(Response::new(csi::GetCapacityResponse {
                available_capacity: 0,
                maximum_volume_size: None,
                minimum_volume_size: None,
            }));
        }

        let capacity = self.backend.region_capacity(&region).await?;

        info!(available_capacity = capacity.available_bytes, "GetCapacity completed");

        Ok(Response::new(csi::GetCapacityResponse {
            available_capacity: capacity.available_bytes,
            maximum_volume_size: Some(capacity.maximum_volume_bytes),
            minimum_volume_size: Some(capacity.minimum_volume_bytes),
        }))
    }

    /// Report controller capabilities.
    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::rpc::Type;

        let capabilities = [
            Type::CreateDeleteVolume,
            Type::PublishUnpublishVolume,
            Type::ListVolumes,
            Type::ListVolumesPublishedNodes,
            Type::GetCapacity,
            Type::ExpandVolume,
        ]
        .into_iter()
        .map(|t| csi::ControllerServiceCapability {
            r#type: Some(csi::controller_service_capability::Type::Rpc(
                csi::controller_service_capability::Rpc { r#type: t as i32 },
            )),
        })
        .collect();

        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("CreateSnapshot is not supported"))
    }

    async fn delete_snapshot(
        &self,
        _request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("DeleteSnapshot is not supported"))
    }

    async fn list_snapshots(
        &self,
        _request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("ListSnapshots is not supported"))
    }

    /// Expand a volume.
    async fn controller_expand_volume(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        let timer = OperationTimer::new("controller_expand_volume");
        timer.finish(self.expand(request).await)
    }

    async fn controller_get_volume(
        &self,
        _request: Request<csi::ControllerGetVolumeRequest>,
    ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerGetVolume is not supported"))
    }

    async fn controller_modify_volume(
        &self,
        _request: Request<csi::ControllerModifyVolumeRequest>,
    ) -> Result<Response<csi::ControllerModifyVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerModifyVolume is not supported"))
    }
}
