use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::info;

use super::{MountEntry, MountError, Mounter, Result};
use crate::types::FsType;

/// An operation the fake mounter performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
    Format { device: String, fs_type: FsType },
    Mount { device: String, target: String },
    BindMount { source: String, target: String, read_only: bool },
    Unmount { target: String },
    Resize { device: String },
}

#[derive(Debug, Default)]
struct FakeDevice {
    signature: Option<String>,
    size: u64,
    fs_size: u64,
}

#[derive(Debug, Default)]
struct FakeMounterInner {
    /// device path (symlink) -> kernel device
    links: HashMap<String, String>,
    devices: HashMap<String, FakeDevice>,
    mounts: Vec<MountEntry>,
    log: Vec<FakeAction>,
    fail_next_format: bool,
    fail_read_only_remount: bool,
}

/// In-memory mounter with Linux mount table semantics.
#[derive(Debug, Default)]
pub struct FakeMounter(Mutex<FakeMounterInner>);

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, FakeMounterInner> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a blank device of `size` bytes appear at `device_path`,
    /// resolving to `device`.
    pub fn add_device(&self, device_path: &str, device: &str, size: u64) {
        let mut inner = self.inner();
        inner
            .links
            .insert(device_path.to_string(), device.to_string());
        inner.devices.insert(
            device.to_string(),
            FakeDevice {
                signature: None,
                size,
                fs_size: 0,
            },
        );
    }

    pub fn with_device(self, device_path: &str, device: &str, size: u64) -> Self {
        self.add_device(device_path, device, size);
        self
    }

    /// Put an existing signature on `device`, filling it.
    pub fn set_signature(&self, device: &str, signature: &str) {
        if let Some(d) = self.inner().devices.get_mut(device) {
            d.signature = Some(signature.to_string());
            d.fs_size = d.size;
        }
    }

    pub fn with_signature(self, device: &str, signature: &str) -> Self {
        self.set_signature(device, signature);
        self
    }

    /// Grow the block device, as after a provider-side resize.
    pub fn set_device_size(&self, device: &str, size: u64) {
        if let Some(d) = self.inner().devices.get_mut(device) {
            d.size = size;
        }
    }

    /// Make the next format fail after writing a partial signature.
    pub fn fail_next_format(&self) {
        self.inner().fail_next_format = true;
    }

    /// Make read-only remounts of bind mounts fail.
    pub fn fail_read_only_remount(&self) {
        self.inner().fail_read_only_remount = true;
    }

    pub fn signature(&self, device: &str) -> Option<String> {
        self.inner()
            .devices
            .get(device)
            .and_then(|d| d.signature.clone())
    }

    pub fn mount_table(&self) -> Vec<MountEntry> {
        self.inner().mounts.clone()
    }

    pub fn actions(&self) -> Vec<FakeAction> {
        self.inner().log.clone()
    }

    pub fn format_count(&self) -> usize {
        self.inner()
            .log
            .iter()
            .filter(|a| matches!(a, FakeAction::Format { .. }))
            .count()
    }
}

fn failed(command: &str, stderr: impl Into<String>) -> MountError {
    MountError::CommandFailed {
        command: command.to_string(),
        stderr: stderr.into(),
    }
}

#[tonic::async_trait]
impl Mounter for FakeMounter {
    async fn find_device(&self, device_path: &str) -> Result<Option<String>> {
        let inner = self.inner();
        if inner.devices.contains_key(device_path) {
            return Ok(Some(device_path.to_string()));
        }
        Ok(inner.links.get(device_path).cloned())
    }

    async fn filesystem_type(&self, device: &str) -> Result<Option<String>> {
        let inner = self.inner();
        let d = inner
            .devices
            .get(device)
            .ok_or_else(|| failed("blkid", format!("{}: no such device", device)))?;
        Ok(d.signature.clone())
    }

    async fn format(&self, device: &str, fs_type: FsType) -> Result<()> {
        let mut inner = self.inner();
        let fail = std::mem::take(&mut inner.fail_next_format);
        let d = inner
            .devices
            .get_mut(device)
            .ok_or_else(|| failed("mkfs", format!("{}: no such device", device)))?;

        if let Some(existing) = &d.signature {
            return Err(MountError::AlreadyFormatted {
                device: device.to_string(),
                existing: existing.clone(),
            });
        }
        if fail {
            // The partial signature is wiped again, as wipefs would.
            d.signature = None;
            return Err(failed("mkfs", "write error"));
        }

        d.signature = Some(fs_type.as_str().to_string());
        d.fs_size = d.size;
        inner.log.push(FakeAction::Format {
            device: device.to_string(),
            fs_type,
        });
        info!(device = %device, fs_type = %fs_type, "Fake mounter: formatted");
        Ok(())
    }

    async fn mount_device(
        &self,
        device: &str,
        target: &str,
        fs_type: FsType,
        read_only: bool,
    ) -> Result<()> {
        let mut inner = self.inner();
        let signature = inner
            .devices
            .get(device)
            .ok_or_else(|| failed("mount", format!("special device {} does not exist", device)))?
            .signature
            .clone();
        if signature.as_deref() != Some(fs_type.as_str()) {
            return Err(failed(
                "mount",
                format!("wrong fs type, bad superblock on {}", device),
            ));
        }

        inner.mounts.push(MountEntry {
            device: device.to_string(),
            path: target.to_string(),
            fs_type: fs_type.as_str().to_string(),
            options: vec![if read_only { "ro" } else { "rw" }.to_string()],
        });
        inner.log.push(FakeAction::Mount {
            device: device.to_string(),
            target: target.to_string(),
        });
        info!(device = %device, target = %target, "Fake mounter: mounted");
        Ok(())
    }

    async fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<()> {
        let mut inner = self.inner();
        if read_only && inner.fail_read_only_remount {
            // Bind succeeded, remount failed, bind rolled back: nothing remains.
            return Err(failed("mount", "cannot remount read-only"));
        }

        // A bind mount shows the device of its source, like /proc/mounts.
        let (device, fs_type) = inner
            .mounts
            .iter()
            .rev()
            .find(|m| m.path == source)
            .map(|m| (m.device.clone(), m.fs_type.clone()))
            .unwrap_or_else(|| (source.to_string(), "none".to_string()));

        inner.mounts.push(MountEntry {
            device,
            path: target.to_string(),
            fs_type,
            options: vec![if read_only { "ro" } else { "rw" }.to_string()],
        });
        inner.log.push(FakeAction::BindMount {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        });
        info!(source = %source, target = %target, "Fake mounter: bind mounted");
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        let mut inner = self.inner();
        if let Some(pos) = inner.mounts.iter().rposition(|m| m.path == target) {
            inner.mounts.remove(pos);
            inner.log.push(FakeAction::Unmount {
                target: target.to_string(),
            });
            info!(target = %target, "Fake mounter: unmounted");
        }
        Ok(())
    }

    async fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(self.mount_table())
    }

    async fn device_size(&self, device: &str) -> Result<u64> {
        self.inner()
            .devices
            .get(device)
            .map(|d| d.size)
            .ok_or_else(|| failed("blockdev", format!("{}: no such device", device)))
    }

    async fn filesystem_size(
        &self,
        device: &str,
        _fs_type: FsType,
        _mount_path: &str,
    ) -> Result<u64> {
        self.inner()
            .devices
            .get(device)
            .map(|d| d.fs_size)
            .ok_or_else(|| failed("dumpe2fs", format!("{}: no such device", device)))
    }

    async fn resize_filesystem(
        &self,
        device: &str,
        _fs_type: FsType,
        _mount_path: &str,
    ) -> Result<()> {
        let mut inner = self.inner();
        let d = inner
            .devices
            .get_mut(device)
            .ok_or_else(|| failed("resize2fs", format!("{}: no such device", device)))?;
        d.fs_size = d.size;
        inner.log.push(FakeAction::Resize {
            device: device.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[tokio::test]
    async fn test_format_refuses_signature() {
        let mounter = FakeMounter::new()
            .with_device("/dev/disk/by-id/virtio-a", "/dev/vdb", 10 * GIB)
            .with_signature("/dev/vdb", "ntfs");

        let err = mounter.format("/dev/vdb", FsType::Ext4).await.unwrap_err();
        assert!(matches!(err, MountError::AlreadyFormatted { .. }));
        assert_eq!(mounter.signature("/dev/vdb").as_deref(), Some("ntfs"));
        assert_eq!(mounter.format_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_format_leaves_device_blank() {
        let mounter = FakeMounter::new().with_device("/dev/disk/by-id/virtio-a", "/dev/vdb", GIB);
        mounter.fail_next_format();

        assert!(mounter.format("/dev/vdb", FsType::Xfs).await.is_err());
        assert_eq!(mounter.signature("/dev/vdb"), None);

        mounter.format("/dev/vdb", FsType::Xfs).await.unwrap();
        assert_eq!(mounter.signature("/dev/vdb").as_deref(), Some("xfs"));
    }

    #[tokio::test]
    async fn test_bind_mount_reports_source_device() {
        let mounter = FakeMounter::new().with_device("/dev/disk/by-id/virtio-a", "/dev/vdb", GIB);
        mounter.format("/dev/vdb", FsType::Ext4).await.unwrap();
        mounter
            .mount_device("/dev/vdb", "/stage/a", FsType::Ext4, false)
            .await
            .unwrap();
        mounter
            .bind_mount("/stage/a", "/target/pod1", true)
            .await
            .unwrap();

        let table = mounter.mount_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table[1].device, "/dev/vdb");
        assert!(table[1].is_read_only());
    }

    #[tokio::test]
    async fn test_failed_read_only_remount_leaves_nothing() {
        let mounter = FakeMounter::new();
        mounter.fail_read_only_remount();
        assert!(mounter.bind_mount("/stage/a", "/target/pod1", true).await.is_err());
        assert!(mounter.mount_table().is_empty());
    }

    #[tokio::test]
    async fn test_unmount_is_idempotent() {
        let mounter = FakeMounter::new();
        mounter.unmount("/not/mounted").await.unwrap();
        assert!(mounter.actions().is_empty());
    }

    #[tokio::test]
    async fn test_resolves_device_links() {
        let mounter = FakeMounter::new();
        assert_eq!(mounter.find_device("/dev/disk/by-id/virtio-a").await.unwrap(), None);

        mounter.add_device("/dev/disk/by-id/virtio-a", "/dev/vdb", GIB);
        assert_eq!(
            mounter
                .find_device("/dev/disk/by-id/virtio-a")
                .await
                .unwrap()
                .as_deref(),
            Some("/dev/vdb")
        );
    }
}
