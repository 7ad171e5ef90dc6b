//! Block device filesystem operations for the node service.
//!
//! [`LinuxMounter`] shells out to the usual util-linux / e2fsprogs /
//! xfsprogs tools. [`FakeMounter`] keeps an in-memory device map and mount
//! table with the same semantics so the node service can be tested without
//! root.
//!
//! Every operation leaves the device or path either fully done or untouched:
//! a failed format wipes partial signatures, and a read-only bind mount that
//! cannot be remounted read-only is removed again.

mod fake;
mod linux;

use thiserror::Error;
use tonic::Status;

use crate::types::FsType;

pub use fake::{FakeAction, FakeMounter};
pub use linux::LinuxMounter;

#[derive(Error, Debug)]
pub enum MountError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("refusing to format {device}: it already carries a {existing} signature")]
    AlreadyFormatted { device: String, existing: String },

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {command}: {output}")]
    Parse { command: String, output: String },
}

impl From<MountError> for Status {
    fn from(err: MountError) -> Self {
        match err {
            MountError::AlreadyFormatted { .. } => Status::failed_precondition(err.to_string()),
            _ => Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MountError>;

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Source device. Bind mounts report the device of the bind source.
    pub device: String,
    /// Mount point
    pub path: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// Find the entry mounted at `path`. The most recent mount wins.
pub fn mount_at<'a>(mounts: &'a [MountEntry], path: &str) -> Option<&'a MountEntry> {
    mounts.iter().rev().find(|m| m.path == path)
}

/// All mount points of `device` other than `except`.
pub fn other_mounts_of<'a>(
    mounts: &'a [MountEntry],
    device: &'a str,
    except: &'a str,
) -> impl Iterator<Item = &'a MountEntry> + 'a {
    mounts
        .iter()
        .filter(move |m| m.device == device && m.path != except)
}

/// Filesystem and mount operations on block devices.
#[tonic::async_trait]
pub trait Mounter: Send + Sync {
    /// Resolve a device path (typically a by-id symlink) to the kernel
    /// device node. `None` when the device is not present.
    async fn find_device(&self, device_path: &str) -> Result<Option<String>>;

    /// Filesystem (or partition table) signature on `device`, `None` when blank.
    async fn filesystem_type(&self, device: &str) -> Result<Option<String>>;

    /// Create a filesystem on a blank device. Fails without touching the
    /// device if it carries any signature.
    async fn format(&self, device: &str, fs_type: FsType) -> Result<()>;

    /// Mount `device` at `target`, creating the directory.
    async fn mount_device(
        &self,
        device: &str,
        target: &str,
        fs_type: FsType,
        read_only: bool,
    ) -> Result<()>;

    /// Bind mount `source` at `target`, creating the directory.
    async fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<()>;

    /// Unmount `target`. Unmounting a path that is not mounted succeeds.
    async fn unmount(&self, target: &str) -> Result<()>;

    /// Current mount table.
    async fn mounts(&self) -> Result<Vec<MountEntry>>;

    /// Size of the block device in bytes.
    async fn device_size(&self, device: &str) -> Result<u64>;

    /// Size of the filesystem on `device` (mounted at `mount_path`) in bytes.
    async fn filesystem_size(&self, device: &str, fs_type: FsType, mount_path: &str)
    -> Result<u64>;

    /// Grow the filesystem to fill the device.
    async fn resize_filesystem(&self, device: &str, fs_type: FsType, mount_path: &str)
    -> Result<()>;
}
