//! CSI Node Service Implementation
//!
//! Handles volume staging and publishing on worker nodes: waits for the
//! attached disk to appear, formats blank disks, mounts them at the staging
//! path and bind mounts the staging path into pods.
//!
//! The mount table is the only state. Calls for the same path are ordered
//! with a waiting keyed lock so that "is it mounted" and "mount it" cannot
//! interleave; calls for different volumes never block each other.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::csi;
use crate::locks::KeyedLocks;
use crate::metrics::OperationTimer;
use crate::mounter::{MountEntry, Mounter, mount_at, other_mounts_of};
use crate::types::{
    FsType, FsTypeParseError, PUBLISH_CONTEXT_DEVICE_PATH, TOPOLOGY_REGION_KEY, VOLUME_CONTEXT_MOUNT_ID,
    device_path_for_mount_id,
};

/// Delay between two checks for an attached disk
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// CSI Node Service
///
/// Implements the CSI Node service which handles:
/// - Volume staging (wait for the disk, format if blank, mount to staging path)
/// - Volume unstaging (unmount from staging path)
/// - Volume publishing (bind mount from staging to target path)
/// - Volume unpublishing (unmount from target path)
/// - Filesystem expansion and node info reporting
pub struct NodeService {
    config: Arc<DriverConfig>,
    mounter: Arc<dyn Mounter>,
    locks: KeyedLocks,
}

impl NodeService {
    pub fn new(config: Arc<DriverConfig>, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            config,
            mounter,
            locks: KeyedLocks::new(),
        }
    }

    /// Validate that a path is safe to use in shell commands.
    /// Returns an error if the path contains dangerous characters.
    fn validate_path(path: &str) -> Result<(), Status> {
        if path.is_empty() {
            return Err(Status::invalid_argument("Path cannot be empty"));
        }

        // Check for absolute path
        if !path.starts_with('/') {
            return Err(Status::invalid_argument("Path must be absolute"));
        }

        // Disallow dangerous characters that could enable shell injection
        let dangerous_chars = [
            ';', '|', '&', '$', '`', '(', ')', '{', '}', '<', '>', '\n', '\r',
        ];
        for c in dangerous_chars {
            if path.contains(c) {
                return Err(Status::invalid_argument(format!(
                    "Path contains dangerous character: '{}'",
                    c
                )));
            }
        }

        // Disallow path traversal
        if path.contains("..") {
            return Err(Status::invalid_argument(
                "Path cannot contain '..' (path traversal)",
            ));
        }

        Ok(())
    }

    /// Filesystem requested by a mount capability. Raw block access is rejected.
    fn requested_fs_type(capability: Option<&csi::VolumeCapability>) -> Result<FsType, Status> {
        let capability =
            capability.ok_or_else(|| Status::invalid_argument("Volume capability is required"))?;
        match &capability.access_type {
            Some(csi::volume_capability::AccessType::Mount(mount)) => mount
                .fs_type
                .parse()
                .map_err(|e: FsTypeParseError| {
                    Status::invalid_argument(e.to_string())
                }),
            Some(csi::volume_capability::AccessType::Block(_)) => Err(Status::invalid_argument(
                "raw block access is not supported",
            )),
            None => Err(Status::invalid_argument(
                "Volume capability must specify access type",
            )),
        }
    }

    fn access_mode(
        capability: Option<&csi::VolumeCapability>,
    ) -> Option<csi::volume_capability::access_mode::Mode> {
        capability
            .and_then(|c| c.access_mode.as_ref())
            .and_then(|m| csi::volume_capability::access_mode::Mode::try_from(m.mode).ok())
    }

    /// Device path of the attached disk: the controller's publish context,
    /// else derived from the volume's mount id.
    fn device_path(
        publish_context: &HashMap<String, String>,
        volume_context: &HashMap<String, String>,
    ) -> Result<String, Status> {
        let path = publish_context
            .get(PUBLISH_CONTEXT_DEVICE_PATH)
            .cloned()
            .or_else(|| {
                volume_context
                    .get(VOLUME_CONTEXT_MOUNT_ID)
                    .filter(|id| !id.is_empty())
                    .map(|id| device_path_for_mount_id(id))
            })
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "{} is required in publish context",
                    PUBLISH_CONTEXT_DEVICE_PATH
                ))
            })?;
        Self::validate_path(&path)?;
        Ok(path)
    }

    /// Resolve the device path to its kernel device, waiting for the disk to
    /// show up after attach.
    async fn wait_for_device(&self, device_path: &str) -> Result<String, Status> {
        let deadline = Instant::now() + self.config.device_wait;
        loop {
            if let Some(device) = self.mounter.find_device(device_path).await? {
                return Ok(device);
            }
            if Instant::now() + DEVICE_POLL_INTERVAL > deadline {
                warn!(device_path = %device_path, "Attached device did not appear");
                return Err(Status::unavailable(format!(
                    "device {} not present after {:?}",
                    device_path, self.config.device_wait
                )));
            }
            debug!(device_path = %device_path, "Waiting for device");
            tokio::time::sleep(DEVICE_POLL_INTERVAL).await;
        }
    }

    async fn stage(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let staging_target_path = &req.staging_target_path;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        if staging_target_path.is_empty() {
            return Err(Status::invalid_argument("Staging target path is required"));
        }

        Self::validate_path(staging_target_path)?;
        let fs_type = Self::requested_fs_type(req.volume_capability.as_ref())?;
        let device_path = Self::device_path(&req.publish_context, &req.volume_context)?;

        info!(
            volume_id = %volume_id,
            staging_target_path = %staging_target_path,
            device_path = %device_path,
            fs_type = %fs_type,
            "NodeStageVolume request"
        );

        let _guard = self.locks.acquire(staging_target_path).await;

        let device = self.wait_for_device(&device_path).await?;
        let mounts = self.mounter.mounts().await?;

        // Check if already staged
        if let Some(existing) = mount_at(&mounts, staging_target_path) {
            if existing.device == device && existing.fs_type == fs_type.as_str() {
                info!(staging_target_path = %staging_target_path, "Volume already staged");
                return Ok(Response::new(csi::NodeStageVolumeResponse {}));
            }
            return Err(Status::already_exists(format!(
                "{} already has {} ({}) mounted",
                staging_target_path, existing.device, existing.fs_type
            )));
        }

        if let Some(other) = other_mounts_of(&mounts, &device, staging_target_path).next() {
            return Err(Status::failed_precondition(format!(
                "device {} is already mounted at {}",
                device, other.path
            )));
        }

        // Format only a device without any signature
        match self.mounter.filesystem_type(&device).await? {
            None => {
                info!(device = %device, fs_type = %fs_type, "Formatting blank device");
                self.mounter.format(&device, fs_type).await.map_err(|e| {
                    error!(error = %e, device = %device, "Failed to format device");
                    e
                })?;
            }
            Some(existing) if existing == fs_type.as_str() => {
                debug!(device = %device, fs_type = %existing, "Device already formatted");
            }
            Some(existing) => {
                warn!(device = %device, existing = %existing, requested = %fs_type, "Device carries another signature");
                return Err(Status::failed_precondition(format!(
                    "device {} already contains {}, not formatting it as {}",
                    device, existing, fs_type
                )));
            }
        }

        // Mount the device to staging path
        self.mounter
            .mount_device(&device, staging_target_path, fs_type, false)
            .await?;

        info!(
            volume_id = %volume_id,
            staging_target_path = %staging_target_path,
            device = %device,
            "Volume staged successfully"
        );

        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn unstage(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let staging_target_path = &req.staging_target_path;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        if staging_target_path.is_empty() {
            return Err(Status::invalid_argument("Staging target path is required"));
        }

        Self::validate_path(staging_target_path)?;

        info!(
            volume_id = %volume_id,
            staging_target_path = %staging_target_path,
            "NodeUnstageVolume request"
        );

        let _guard = self.locks.acquire(staging_target_path).await;

        let mounts = self.mounter.mounts().await?;
        let Some(staged) = mount_at(&mounts, staging_target_path) else {
            info!(staging_target_path = %staging_target_path, "Volume not staged");
            return Ok(Response::new(csi::NodeUnstageVolumeResponse {}));
        };

        let published: Vec<&str> = other_mounts_of(&mounts, &staged.device, staging_target_path)
            .map(|m| m.path.as_str())
            .collect();
        if !published.is_empty() {
            return Err(Status::failed_precondition(format!(
                "volume {} is still published at {}",
                volume_id,
                published.join(", ")
            )));
        }

        // Unmount from staging path
        self.mounter.unmount(staging_target_path).await?;

        info!(
            volume_id = %volume_id,
            staging_target_path = %staging_target_path,
            "Volume unstaged successfully"
        );

        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    async fn publish(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        use csi::volume_capability::access_mode::Mode;

        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let target_path = &req.target_path;
        let staging_target_path = &req.staging_target_path;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        if target_path.is_empty() {
            return Err(Status::invalid_argument("Target path is required"));
        }

        Self::validate_path(target_path)?;

        if staging_target_path.is_empty() {
            return Err(Status::invalid_argument(
                "Staging target path is required (STAGE_UNSTAGE_VOLUME capability is enabled)",
            ));
        }

        Self::validate_path(staging_target_path)?;

        // Both keys are taken below; the same path twice would wait on itself.
        if target_path == staging_target_path {
            return Err(Status::invalid_argument(
                "Target path must differ from staging target path",
            ));
        }

        Self::requested_fs_type(req.volume_capability.as_ref())?;

        let mode = Self::access_mode(req.volume_capability.as_ref());
        let readonly = req.readonly || mode == Some(Mode::SingleNodeReaderOnly);

        info!(
            volume_id = %volume_id,
            staging_target_path = %staging_target_path,
            target_path = %target_path,
            readonly = %readonly,
            "NodePublishVolume request"
        );

        // Staging before target, the same order everywhere.
        let _staging_guard = self.locks.acquire(staging_target_path).await;
        let _target_guard = self.locks.acquire(target_path).await;

        let mounts = self.mounter.mounts().await?;

        // Check if staging path is mounted
        let staged = mount_at(&mounts, staging_target_path).ok_or_else(|| {
            Status::failed_precondition(format!("Volume not staged at {}", staging_target_path))
        })?;

        // Check if already published
        if let Some(existing) = mount_at(&mounts, target_path) {
            if is_bind_of(existing, staged, readonly) {
                info!(target_path = %target_path, "Volume already published");
                return Ok(Response::new(csi::NodePublishVolumeResponse {}));
            }
            return Err(Status::already_exists(format!(
                "{} is already mounted from {} ({})",
                target_path,
                existing.device,
                if existing.is_read_only() { "ro" } else { "rw" }
            )));
        }

        if mode == Some(Mode::SingleNodeSingleWriter)
            && let Some(other) = other_mounts_of(&mounts, &staged.device, staging_target_path)
                .find(|m| m.path != *target_path)
        {
            return Err(Status::failed_precondition(format!(
                "volume {} is single-writer and already published at {}",
                volume_id, other.path
            )));
        }

        // Create bind mount from staging to target
        self.mounter
            .bind_mount(staging_target_path, target_path, readonly)
            .await
            .map_err(|e| {
                error!(error = %e, target_path = %target_path, "Failed to bind mount");
                e
            })?;

        info!(
            volume_id = %volume_id,
            target_path = %target_path,
            "Volume published successfully"
        );

        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn unpublish(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let target_path = &req.target_path;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        if target_path.is_empty() {
            return Err(Status::invalid_argument("Target path is required"));
        }

        Self::validate_path(target_path)?;

        info!(
            volume_id = %volume_id,
            target_path = %target_path,
            "NodeUnpublishVolume request"
        );

        let _guard = self.locks.acquire(target_path).await;

        // Unmount from target path
        self.mounter.unmount(target_path).await?;

        // Try to remove the target directory
        if Path::new(target_path).exists()
            && let Err(e) = tokio::fs::remove_dir(target_path).await
        {
            // Only warn, don't fail - the directory might not be empty
            warn!(error = %e, target_path = %target_path, "Could not remove target directory");
        }

        info!(
            volume_id = %volume_id,
            target_path = %target_path,
            "Volume unpublished successfully"
        );

        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn expand(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = &req.volume_id;
        let volume_path = &req.volume_path;

        if volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID is required"));
        }

        if volume_path.is_empty() {
            return Err(Status::invalid_argument("Volume path is required"));
        }

        Self::validate_path(volume_path)?;

        info!(
            volume_id = %volume_id,
            volume_path = %volume_path,
            "NodeExpandVolume request"
        );

        // Same key as stage/unstage or publish/unpublish of this path.
        let _guard = self.locks.acquire(volume_path).await;

        let mounts = self.mounter.mounts().await?;
        let entry = mount_at(&mounts, volume_path)
            .ok_or_else(|| Status::not_found(format!("{} is not mounted", volume_path)))?;
        let fs_type: FsType = entry.fs_type.parse().map_err(|e: FsTypeParseError| {
            Status::failed_precondition(e.to_string())
        })?;

        let device_size = self.mounter.device_size(&entry.device).await?;
        let required = req
            .capacity_range
            .as_ref()
            .map_or(0, |r| r.required_bytes.max(0) as u64);
        if required > device_size {
            // The kernel has not seen the provider-side resize yet.
            return Err(Status::unavailable(format!(
                "device {} is {} bytes, expected at least {}",
                entry.device, device_size, required
            )));
        }

        let fs_size = self
            .mounter
            .filesystem_size(&entry.device, fs_type, volume_path)
            .await?;
        if device_size > fs_size {
            info!(
                device = %entry.device,
                fs_size = fs_size,
                device_size = device_size,
                "Growing filesystem"
            );
            self.mounter
                .resize_filesystem(&entry.device, fs_type, volume_path)
                .await?;
        } else {
            debug!(device = %entry.device, "Filesystem already fills the device");
        }

        info!(
            volume_id = %volume_id,
            capacity_bytes = device_size,
            "Volume expansion completed"
        );

        Ok(Response::new(csi::NodeExpandVolumeResponse {
            capacity_bytes: device_size as i64,
        }))
    }
}

/// Whether `existing` is a bind of the staged volume with the requested access.
fn is_bind_of(existing: &MountEntry, staged: &MountEntry, readonly: bool) -> bool {
    existing.device == staged.device && existing.is_read_only() == readonly
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    /// Stage a volume to a staging path.
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_stage_volume");
        timer.finish(self.stage(request).await)
    }

    /// Unstage a volume from the staging path.
    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unstage_volume");
        timer.finish(self.unstage(request).await)
    }

    /// Publish a volume to a target path (bind mount from staging).
    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_publish_volume");
        timer.finish(self.publish(request).await)
    }

    /// Unpublish a volume from the target path.
    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unpublish_volume");
        timer.finish(self.unpublish(request).await)
    }

    /// Get information about this node.
    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        info!(node_id = %self.config.node_id, region = %self.config.region, "NodeGetInfo request");

        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: self.config.max_volumes_per_node,
            accessible_topology: Some(csi::Topology {
                segments: [(TOPOLOGY_REGION_KEY.to_string(), self.config.region.clone())]
                    .into_iter()
                    .collect(),
            }),
        }))
    }

    /// Report node capabilities.
    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        let capabilities = vec![
            csi::NodeServiceCapability {
                r#type: Some(csi::node_service_capability::Type::Rpc(
                    csi::node_service_capability::Rpc {
                        r#type: csi::node_service_capability::rpc::Type::StageUnstageVolume as i32,
                    },
                )),
            },
            csi::NodeServiceCapability {
                r#type: Some(csi::node_service_capability::Type::Rpc(
                    csi::node_service_capability::Rpc {
                        r#type: csi::node_service_capability::rpc::Type::ExpandVolume as i32,
                    },
                )),
            },
        ];

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    /// Grow the filesystem of a mounted volume to fill its device.
    async fn node_expand_volume(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_expand_volume");
        timer.finish(self.expand(request).await)
    }

    /// Get volume statistics (not implemented).
    async fn node_get_volume_stats(
        &self,
        _request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        Err(Status::unimplemented("NodeGetVolumeStats is not supported"))
    }
}
