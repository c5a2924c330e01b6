//! Host filesystem mount facility.
//!
//! [`MountFacility`] is the capability trait the mount lifecycle manager
//! is written against; [`SystemMounter`] is the production implementation
//! driving `blkid`/`mkfs` and the kernel mount syscalls.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::VolumeError;

/// Filesystem and mount primitives consumed by the lifecycle manager.
#[async_trait]
pub trait MountFacility: Send + Sync {
    /// Mount `device` at `target` with the given filesystem type, creating
    /// the target directory if needed.
    ///
    /// The device is formatted first if and only if it carries no
    /// recognized filesystem signature and `read_only` is false.  A
    /// signatureless device that may not be formatted fails with
    /// [`VolumeError::MountFailed`].
    async fn format_and_mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        read_only: bool,
    ) -> Result<(), VolumeError>;

    /// Unmount the filesystem at `target`.
    async fn unmount(&self, target: &Path) -> Result<(), VolumeError>;

    /// Whether `target` is currently a mount point.
    async fn is_mountpoint(&self, target: &Path) -> bool;

    /// Resolve the device node for `partition` of `device`.
    ///
    /// Fails with [`VolumeError::PartitionNotFound`] when the partition's
    /// device node does not exist.
    async fn partition_device(
        &self,
        device: &str,
        partition: &str,
    ) -> Result<String, VolumeError>;
}

/// Derive the conventional device-node name for a partition: a `p`
/// separator when the parent device name ends in a digit (`/dev/nvme0n1`
/// style), plain concatenation otherwise (`/dev/sdb` style).
pub(crate) fn partition_device_name(device: &str, partition: &str) -> String {
    if device.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{device}p{partition}")
    } else {
        format!("{device}{partition}")
    }
}

// ---------------------------------------------------------------------------
// Production implementation
// ---------------------------------------------------------------------------

/// [`MountFacility`] backed by the host kernel and the standard
/// filesystem tooling (`blkid` for signature probing, `mkfs.<fstype>`
/// for formatting).
#[derive(Debug, Default)]
pub struct SystemMounter;

impl SystemMounter {
    /// Probe `device` for an existing filesystem signature.  Returns the
    /// detected filesystem type, or `None` for an unformatted device.
    async fn probe_signature(&self, device: &str) -> Result<Option<String>, VolumeError> {
        let output = tokio::process::Command::new("blkid")
            .args(["-p", "-s", "TYPE", "-o", "value", device])
            .output()
            .await
            .map_err(|e| VolumeError::MountFailed {
                path: device.to_owned(),
                reason: format!("blkid: {e}"),
            })?;

        // blkid exits non-zero for a device with no recognizable signature.
        if !output.status.success() {
            return Ok(None);
        }
        let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok((!fs_type.is_empty()).then_some(fs_type))
    }

    async fn format(&self, device: &str, fs_type: &str) -> Result<(), VolumeError> {
        info!(device, fs_type, "formatting unformatted device");
        let status = tokio::process::Command::new(format!("mkfs.{fs_type}"))
            .arg(device)
            .status()
            .await
            .map_err(|e| VolumeError::MountFailed {
                path: device.to_owned(),
                reason: format!("mkfs.{fs_type}: {e}"),
            })?;
        if !status.success() {
            return Err(VolumeError::MountFailed {
                path: device.to_owned(),
                reason: format!("mkfs.{fs_type} exited with {:?}", status.code()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MountFacility for SystemMounter {
    async fn format_and_mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        read_only: bool,
    ) -> Result<(), VolumeError> {
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| VolumeError::MountFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            })?;

        match self.probe_signature(device).await? {
            Some(existing) => {
                debug!(device, %existing, "device already formatted");
            }
            None if read_only => {
                // Formatting a read-only volume is not permitted, and an
                // unformatted device cannot be mounted.
                return Err(VolumeError::MountFailed {
                    path: target.display().to_string(),
                    reason: format!("device {device} has no filesystem and is read-only"),
                });
            }
            None => self.format(device, fs_type).await?,
        }

        let mut flags = nix::mount::MsFlags::empty();
        if read_only {
            flags |= nix::mount::MsFlags::MS_RDONLY;
        }

        nix::mount::mount(
            Some(device),
            target,
            Some(fs_type),
            flags,
            None::<&str>,
        )
        .map_err(|e| VolumeError::MountFailed {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(device, target = %target.display(), fs_type, read_only, "device mounted");
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), VolumeError> {
        nix::mount::umount(target).map_err(|e| VolumeError::TeardownFailed {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(target = %target.display(), "unmounted");
        Ok(())
    }

    async fn is_mountpoint(&self, target: &Path) -> bool {
        let contents = match tokio::fs::read_to_string("/proc/self/mounts").await {
            Ok(c) => c,
            Err(_) => return false,
        };
        let target = target.to_string_lossy();
        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>.
        // Mount paths derived from pod UIDs and volume names contain no
        // whitespace, so direct string comparison is safe here.
        contents
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(target.as_ref()))
    }

    async fn partition_device(
        &self,
        device: &str,
        partition: &str,
    ) -> Result<String, VolumeError> {
        let node = partition_device_name(device, partition);
        match tokio::fs::metadata(&node).await {
            Ok(_) => Ok(node),
            Err(_) => Err(VolumeError::PartitionNotFound {
                device: device.to_owned(),
                partition: partition.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Test implementation
// ---------------------------------------------------------------------------
