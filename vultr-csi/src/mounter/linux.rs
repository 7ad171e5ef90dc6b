//! Linux mounter
//!
//! Uses:
//! - blkid / wipefs for signature probing and cleanup
//! - mkfs.ext4 / mkfs.xfs for formatting
//! - mount / umount and /proc/mounts for the mount table
//! - blockdev, dumpe2fs, xfs_io, resize2fs, xfs_growfs for expansion

use std::io::ErrorKind;
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{MountEntry, MountError, Mounter, Result};
use crate::types::FsType;

const PROC_MOUNTS: &str = "/proc/mounts";

/// blkid exit status when no signature was found
const BLKID_NOTHING_FOUND: i32 = 2;

/// Mounter backed by the host's filesystem tools.
#[derive(Debug, Clone, Default)]
pub struct LinuxMounter;

impl LinuxMounter {
    pub fn new() -> Self {
        Self
    }
}

async fn run(program: &str, args: &[&str]) -> Result<Output> {
    debug!(command = %program, args = ?args, "Running command");
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            error!(error = %e, command = %program, "Failed to execute command");
            MountError::Spawn {
                command: program.to_string(),
                source: e,
            }
        })
}

/// Run a command and return its stdout, failing on a non-zero exit.
async fn run_checked(program: &str, args: &[&str]) -> Result<String> {
    let output = run(program, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(command = %program, stderr = %stderr, "Command failed");
        return Err(MountError::CommandFailed {
            command: program.to_string(),
            stderr,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn create_dir(path: &str) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| MountError::Io {
            path: path.to_string(),
            source: e,
        })
}

/// Parse `blkid -p -o export` output into a signature name.
///
/// A partition table counts as a signature: a partitioned disk is never
/// formatted.
fn parse_blkid_export(output: &str) -> Option<String> {
    let mut pttype = None;
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("TYPE=") {
            return Some(value.trim().to_string());
        }
        if let Some(value) = line.strip_prefix("PTTYPE=") {
            pttype = Some(value.trim().to_string());
        }
    }
    pttype
}

/// Undo the octal escaping /proc/mounts applies to spaces, tabs, newlines
/// and backslashes.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(b) = u8::try_from(value) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_proc_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next()?;
            Some(MountEntry {
                device: unescape_mount_field(device),
                path: unescape_mount_field(path),
                fs_type: fs_type.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Extract a `<key>: <number>` field from `dumpe2fs -h` output.
fn dumpe2fs_field(output: &str, key: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim().parse().ok()).flatten()
    })
}

/// Extract a `<key> = <number>` field from `xfs_io -c statfs` output.
fn xfs_io_field(output: &str, key: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().parse().ok()).flatten()
    })
}

#[tonic::async_trait]
impl Mounter for LinuxMounter {
    async fn find_device(&self, device_path: &str) -> Result<Option<String>> {
        match tokio::fs::canonicalize(device_path).await {
            Ok(path) => Ok(Some(path.to_string_lossy().into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MountError::Io {
                path: device_path.to_string(),
                source: e,
            }),
        }
    }

    async fn filesystem_type(&self, device: &str) -> Result<Option<String>> {
        let output = run("blkid", &["-p", "-o", "export", device]).await?;
        if output.status.code() == Some(BLKID_NOTHING_FOUND) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(MountError::CommandFailed {
                command: "blkid".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_blkid_export(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn format(&self, device: &str, fs_type: FsType) -> Result<()> {
        // Probe again right before mkfs; the caller's probe may be stale.
        if let Some(existing) = self.filesystem_type(device).await? {
            return Err(MountError::AlreadyFormatted {
                device: device.to_string(),
                existing,
            });
        }

        info!(device = %device, fs_type = %fs_type, "Formatting device");
        let result = match fs_type {
            // -F: whole-disk device, don't prompt
            FsType::Ext4 => run_checked("mkfs.ext4", &["-F", device]).await,
            // No -f: mkfs.xfs refuses to overwrite a signature on its own
            FsType::Xfs => run_checked("mkfs.xfs", &[device]).await,
        };

        if let Err(e) = result {
            warn!(device = %device, error = %e, "Format failed, wiping partial signatures");
            if let Err(wipe) = run_checked("wipefs", &["-a", device]).await {
                error!(device = %device, error = %wipe, "Failed to wipe device after format failure");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn mount_device(
        &self,
        device: &str,
        target: &str,
        fs_type: FsType,
        read_only: bool,
    ) -> Result<()> {
        info!(device = %device, target = %target, fs_type = %fs_type, read_only, "Mounting device");
        create_dir(target).await?;

        let mut args = vec!["-t", fs_type.as_str()];
        if read_only {
            args.extend(["-o", "ro"]);
        }
        args.extend([device, target]);
        run_checked("mount", &args).await?;
        Ok(())
    }

    async fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<()> {
        info!(source = %source, target = %target, read_only, "Creating bind mount");
        create_dir(target).await?;
        run_checked("mount", &["--bind", source, target]).await?;

        if read_only
            && let Err(e) = run_checked("mount", &["-o", "remount,bind,ro", target]).await
        {
            // A writable bind where read-only was asked for must not survive.
            warn!(target = %target, error = %e, "Read-only remount failed, rolling back bind mount");
            if let Err(undo) = run_checked("umount", &[target]).await {
                error!(target = %target, error = %undo, "Failed to roll back bind mount");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        if !self.mounts().await?.iter().any(|m| m.path == target) {
            debug!(target = %target, "Path is not mounted, skipping unmount");
            return Ok(());
        }

        info!(target = %target, "Unmounting");
        let output = run("umount", &[target]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("not mounted") || stderr.contains("no mount point") {
                warn!(target = %target, "Path was not mounted");
                return Ok(());
            }
            return Err(MountError::CommandFailed {
                command: "umount".to_string(),
                stderr,
            });
        }
        Ok(())
    }

    async fn mounts(&self) -> Result<Vec<MountEntry>> {
        let content = tokio::fs::read_to_string(PROC_MOUNTS)
            .await
            .map_err(|e| MountError::Io {
                path: PROC_MOUNTS.to_string(),
                source: e,
            })?;
        Ok(parse_proc_mounts(&content))
    }

    async fn device_size(&self, device: &str) -> Result<u64> {
        let stdout = run_checked("blockdev", &["--getsize64", device]).await?;
        stdout.trim().parse().map_err(|_| MountError::Parse {
            command: "blockdev".to_string(),
            output: stdout.trim().to_string(),
        })
    }

    async fn filesystem_size(
        &self,
        device: &str,
        fs_type: FsType,
        mount_path: &str,
    ) -> Result<u64> {
        let (command, size) = match fs_type {
            FsType::Ext4 => {
                let out = run_checked("dumpe2fs", &["-h", device]).await?;
                let size = dumpe2fs_field(&out, "Block count")
                    .zip(dumpe2fs_field(&out, "Block size"))
                    .map(|(count, block)| count * block);
                ("dumpe2fs", size.ok_or(out))
            }
            FsType::Xfs => {
                let out = run_checked("xfs_io", &["-c", "statfs", mount_path]).await?;
                let size = xfs_io_field(&out, "geom.datablocks")
                    .zip(xfs_io_field(&out, "geom.bsize"))
                    .map(|(count, block)| count * block);
                ("xfs_io", size.ok_or(out))
            }
        };

        size.map_err(|output| MountError::Parse {
            command: command.to_string(),
            output,
        })
    }

    async fn resize_filesystem(
        &self,
        device: &str,
        fs_type: FsType,
        mount_path: &str,
    ) -> Result<()> {
        info!(device = %device, mount_path = %mount_path, fs_type = %fs_type, "Growing filesystem");
        match fs_type {
            FsType::Ext4 => run_checked("resize2fs", &[device]).await?,
            FsType::Xfs => run_checked("xfs_growfs", &[mount_path]).await?,
        };
        Ok(())
    }
}
