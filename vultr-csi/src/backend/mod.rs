//! Block storage backend abstraction.
//!
//! The controller service talks to the provider only through
//! [`VolumeBackend`]. [`VultrClient`] is the production implementation over
//! the Vultr v2 HTTP API; [`InMemoryBackend`] implements the same contract
//! entirely in memory for tests.

mod error;
mod memory;
mod vultr;

use std::fmt::{self, Display};

pub use error::{BackendError, Result};
pub use memory::InMemoryBackend;
pub use vultr::{DEFAULT_API_URL, VultrClient};

/// Lifecycle state of a block storage volume as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStatus {
    /// Provisioning has not finished yet
    Creating,
    /// Ready and not attached to any instance
    Available,
    /// Ready and attached to an instance
    Attached,
    /// Ready again after a detach
    Detached,
    /// Removal in progress
    Deleting,
    /// The provider reported a failure
    Error,
}

impl VolumeStatus {
    /// Whether the volume has finished provisioning and can be used.
    pub const fn is_ready(self) -> bool {
        matches!(
            self,
            VolumeStatus::Available | VolumeStatus::Attached | VolumeStatus::Detached
        )
    }
}

impl Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeStatus::Creating => "creating",
            VolumeStatus::Available => "available",
            VolumeStatus::Attached => "attached",
            VolumeStatus::Detached => "detached",
            VolumeStatus::Deleting => "deleting",
            VolumeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A block storage volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Provider-assigned identifier
    pub id: String,
    /// Caller-assigned label; the CSI volume name
    pub label: String,
    /// Size in GiB
    pub size_gb: u64,
    /// Region the volume lives in
    pub region: String,
    pub status: VolumeStatus,
    /// Instance the volume is attached to, if any
    pub attached_to: Option<String>,
    /// Serial the guest sees the disk under once attached
    pub mount_id: String,
}

impl Volume {
    /// Whether the volume is attached to the given instance.
    pub fn is_attached_to(&self, node_id: &str) -> bool {
        self.attached_to.as_deref() == Some(node_id)
    }
}

/// A compute instance volumes can attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub region: String,
}

/// One page of a volume listing.
#[derive(Debug, Clone, Default)]
pub struct VolumePage {
    pub volumes: Vec<Volume>,
    /// Cursor for the following page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Capacity the backend can still provision in a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionCapacity {
    pub available_bytes: i64,
    pub minimum_volume_bytes: i64,
    pub maximum_volume_bytes: i64,
}

/// Operations the plugin needs from the block storage provider.
///
/// Every call is one-shot; implementations bound their own request time.
/// Asynchronous effects (provisioning, attach, detach) are observed by
/// re-reading the volume with [`VolumeBackend::get_volume`].
#[tonic::async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Request a new volume. The returned volume may still be `Creating`.
    async fn create_volume(&self, region: &str, size_gb: u64, label: &str) -> Result<Volume>;

    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    async fn get_volume(&self, volume_id: &str) -> Result<Volume>;

    /// Fetch one page of volumes starting at `cursor`.
    async fn list_volumes(&self, cursor: Option<&str>, per_page: u32) -> Result<VolumePage>;

    /// Request an attach. Completion is observed through `get_volume`.
    async fn attach_volume(&self, volume_id: &str, node_id: &str) -> Result<()>;

    /// Request a detach. Detaching an unattached volume succeeds.
    async fn detach_volume(&self, volume_id: &str) -> Result<()>;

    async fn resize_volume(&self, volume_id: &str, size_gb: u64) -> Result<()>;

    async fn get_instance(&self, node_id: &str) -> Result<Instance>;

    async fn region_capacity(&self, region: &str) -> Result<RegionCapacity>;
}

/// Page size used when the controller walks every volume.
const SCAN_PAGE_SIZE: u32 = 100;

/// Find a volume by its label, walking all pages.
pub async fn find_volume_by_label(
    backend: &dyn VolumeBackend,
    label: &str,
) -> Result<Option<Volume>> {
    let mut cursor: Option<String> = None;
    loop {
        let page = backend.list_volumes(cursor.as_deref(), SCAN_PAGE_SIZE).await?;
        if let Some(volume) = page.volumes.into_iter().find(|v| v.label == label) {
            return Ok(Some(volume));
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(None),
        }
    }
}
