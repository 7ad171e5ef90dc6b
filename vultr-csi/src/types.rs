//! Type-safe wrappers for CSI parameters.
//!
//! These types provide compile-time safety for values parsed from CSI
//! requests (filesystem types, capacity ranges) and for the keys exchanged
//! between the controller and node services through the orchestrator.

use std::fmt::{self, Display};
use std::str::FromStr;

/// Topology segment key carrying the provider region.
pub const TOPOLOGY_REGION_KEY: &str = "topology.vultr.com/region";

/// Publish context key carrying the node-local device path.
pub const PUBLISH_CONTEXT_DEVICE_PATH: &str = "device_path";

/// Volume context key carrying the provider mount id.
pub const VOLUME_CONTEXT_MOUNT_ID: &str = "mount_id";

/// Directory where the kernel exposes attached virtio disks by serial.
const DISK_BY_ID_DIR: &str = "/dev/disk/by-id";

/// Device path of an attached block volume, derived from its mount id.
pub fn device_path_for_mount_id(mount_id: &str) -> String {
    format!("{}/virtio-{}", DISK_BY_ID_DIR, mount_id)
}

// ============================================================================
// FsType
// ============================================================================

/// Filesystem type used when formatting and mounting a staged volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsType {
    /// ext4 (default)
    #[default]
    Ext4,
    /// XFS
    Xfs,
}

impl FsType {
    /// Name understood by `mount -t` and `mkfs.<name>`.
    pub const fn as_str(self) -> &'static str {
        match self {
            FsType::Ext4 => "ext4",
            FsType::Xfs => "xfs",
        }
    }
}

impl Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = FsTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ext4" | "" => Ok(FsType::Ext4),
            "xfs" => Ok(FsType::Xfs),
            _ => Err(FsTypeParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unsupported filesystem type.
#[derive(Debug, Clone)]
pub struct FsTypeParseError(String);

impl Display for FsTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported filesystem type '{}': expected 'ext4' or 'xfs'",
            self.0
        )
    }
}

impl std::error::Error for FsTypeParseError {}

// ============================================================================
// VolumeSize
// ============================================================================

/// One GiB in bytes.
pub const GIB: i64 = 1024 * 1024 * 1024;

/// Smallest block storage volume the provider will create.
pub const MIN_VOLUME_SIZE_GB: u64 = 10;

/// Largest block storage volume the provider will create.
pub const MAX_VOLUME_SIZE_GB: u64 = 10_000;

/// A provider size tier: a whole number of GiB within the provider limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VolumeSize(u64);

impl VolumeSize {
    /// Default tier used when the orchestrator does not ask for a capacity.
    pub const DEFAULT: VolumeSize = VolumeSize(MIN_VOLUME_SIZE_GB);

    /// Wrap a size already expressed in provider GiB.
    pub const fn from_gb(size_gb: u64) -> Self {
        Self(size_gb)
    }

    /// Size in GiB, the unit of the provider API.
    pub const fn gb(self) -> u64 {
        self.0
    }

    /// Size in bytes, the unit of the CSI API.
    pub const fn bytes(self) -> i64 {
        self.0 as i64 * GIB
    }

    /// Pick the smallest tier that satisfies a CSI capacity range.
    ///
    /// Never rounds down: the result is at least `required_bytes`. A range
    /// that cannot be met by any tier is rejected rather than clamped.
    pub fn from_range(required_bytes: i64, limit_bytes: i64) -> Result<Self, VolumeSizeError> {
        if required_bytes < 0 || limit_bytes < 0 {
            return Err(VolumeSizeError::Negative);
        }
        if required_bytes == 0 && limit_bytes == 0 {
            return Err(VolumeSizeError::Empty);
        }
        if limit_bytes > 0 && required_bytes > limit_bytes {
            return Err(VolumeSizeError::RequiredExceedsLimit {
                required_bytes,
                limit_bytes,
            });
        }

        let required_gb = (required_bytes as u64).div_ceil(GIB as u64);
        let size_gb = required_gb.max(MIN_VOLUME_SIZE_GB);

        if size_gb > MAX_VOLUME_SIZE_GB {
            return Err(VolumeSizeError::TooLarge { size_gb });
        }
        if limit_bytes > 0 && size_gb as i64 * GIB > limit_bytes {
            return Err(VolumeSizeError::NoTierWithinLimit {
                size_gb,
                limit_bytes,
            });
        }

        Ok(Self(size_gb))
    }
}

impl Display for VolumeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}GiB", self.0)
    }
}

/// Error returned when a capacity range cannot be mapped onto a size tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSizeError {
    Negative,
    Empty,
    RequiredExceedsLimit { required_bytes: i64, limit_bytes: i64 },
    TooLarge { size_gb: u64 },
    NoTierWithinLimit { size_gb: u64, limit_bytes: i64 },
}

impl VolumeSizeError {
    /// Whether the request was malformed (as opposed to unsatisfiable).
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            VolumeSizeError::Negative
                | VolumeSizeError::Empty
                | VolumeSizeError::RequiredExceedsLimit { .. }
        )
    }
}

impl Display for VolumeSizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeSizeError::Negative => write!(f, "capacity range must not be negative"),
            VolumeSizeError::Empty => {
                write!(f, "capacity range must set required_bytes or limit_bytes")
            }
            VolumeSizeError::RequiredExceedsLimit {
                required_bytes,
                limit_bytes,
            } => write!(
                f,
                "required_bytes {} exceeds limit_bytes {}",
                required_bytes, limit_bytes
            ),
            VolumeSizeError::TooLarge { size_gb } => write!(
                f,
                "requested size {}GiB exceeds the maximum of {}GiB",
                size_gb, MAX_VOLUME_SIZE_GB
            ),
            VolumeSizeError::NoTierWithinLimit {
                size_gb,
                limit_bytes,
            } => write!(
                f,
                "smallest available size {}GiB exceeds limit_bytes {}",
                size_gb, limit_bytes
            ),
        }
    }
}

impl std::error::Error for VolumeSizeError {}

// ============================================================================
// Tests
// ============================================================================
