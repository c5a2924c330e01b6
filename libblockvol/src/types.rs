//! Core data model: volume identity, volume specs, descriptors, and
//! bookkeeping records.
//!
//! These types are shared by the plugin contract, the mount lifecycle
//! manager, and the backend adapter.  They are all [`Serialize`]/
//! [`Deserialize`] so requests and descriptors can be transmitted to the
//! block-store control plane as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::VolumeError;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, backend-assigned identifier for a block volume.
///
/// Immutable after creation: every descriptor and mount record referring to
/// the same backend volume carries the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Volume source descriptor
// ---------------------------------------------------------------------------

/// Describes a backend block volume and how it should be mounted.
///
/// This is the backend-specific descriptor a workload's volume spec must
/// carry for this plugin to claim it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockVolumeSource {
    /// Backend-assigned volume identifier.
    pub volume_id: VolumeId,
    /// Filesystem type to mount, e.g. `"ext4"`.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    /// Whether the volume is mounted read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Optional partition of the attached device to mount instead of the
    /// whole device, e.g. `"1"`.
    #[serde(default)]
    pub partition: Option<String>,
}

pub(crate) fn default_fs_type() -> String {
    "ext4".to_owned()
}

impl BlockVolumeSource {
    /// Descriptor for a freshly provisioned volume: requested filesystem
    /// type with read-write access and no partition.
    pub fn new(volume_id: VolumeId, fs_type: impl Into<String>) -> Self {
        Self {
            volume_id,
            fs_type: fs_type.into(),
            read_only: false,
            partition: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Workload volume specs
// ---------------------------------------------------------------------------

/// An ephemeral volume declared inline in a pod spec.
///
/// `block_volume` is `None` when the inline volume belongs to a different
/// plugin; the resolver treats such specs as unsupported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InlineVolume {
    /// Backend descriptor, present iff this plugin owns the volume.
    #[serde(default)]
    pub block_volume: Option<BlockVolumeSource>,
}

/// The spec of a persistent volume bound to a claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentVolume {
    /// Backend descriptor, present iff this plugin owns the volume.
    #[serde(default)]
    pub block_volume: Option<BlockVolumeSource>,
    /// Provisioned capacity in GiB.
    #[serde(default)]
    pub capacity_gb: u64,
}

/// A workload volume specification handed to the plugin by the host.
///
/// Exactly one of `volume` (inline ephemeral) or `persistent_volume` is
/// normally populated; the host owns this shape and the plugin only reads
/// from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name, unique within the pod.
    pub name: String,
    /// Inline ephemeral pod volume, if that is the spec's shape.
    #[serde(default)]
    pub volume: Option<InlineVolume>,
    /// Persistent-volume-backed spec, if that is the spec's shape.
    #[serde(default)]
    pub persistent_volume: Option<PersistentVolume>,
    /// Read-only flag at the binding level.  Only meaningful for the
    /// persistent-volume shape; inline volumes carry their own flag.
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeSpec {
    /// Resolve the backend descriptor and effective read-only flag from
    /// this spec.
    ///
    /// Inline volumes take the read-only flag from the descriptor itself;
    /// persistent volumes take it from the binding level.  Pure function,
    /// no side effects.
    ///
    /// # Errors
    ///
    /// [`VolumeError::UnsupportedSpecKind`] when neither variant carries a
    /// [`BlockVolumeSource`] — the host should pick a different plugin.
    pub fn block_volume_source(&self) -> Result<(&BlockVolumeSource, bool), VolumeError> {
        if let Some(inline) = &self.volume
            && let Some(source) = &inline.block_volume
        {
            return Ok((source, source.read_only));
        }
        if let Some(pv) = &self.persistent_volume
            && let Some(source) = &pv.block_volume
        {
            return Ok((source, self.read_only));
        }
        Err(VolumeError::UnsupportedSpecKind(self.name.clone()))
    }
}

// ---------------------------------------------------------------------------
// Mount bookkeeping
// ---------------------------------------------------------------------------

/// Local bookkeeping tying a mounted host path to a backend volume and a
/// pod.
///
/// Created on successful mount, consulted on teardown to decide whether
/// detaching the volume from this node is safe, and destroyed on successful
/// teardown.  Never persisted — the orchestration host is the source of
/// truth across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountRecord {
    /// Host-local mount path, derived from (pod UID, volume name).
    pub host_path: String,
    /// UID of the pod the mount belongs to.
    pub pod_uid: String,
    /// Backend volume mounted at `host_path`.
    pub volume_id: VolumeId,
}

// ---------------------------------------------------------------------------
// Backend requests
// ---------------------------------------------------------------------------

/// Options for creating a new backend volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeOptions {
    /// Requested capacity in GiB.  The backend allocates in whole-GiB
    /// granularity and may round up further.
    pub capacity_gb: u64,
    /// Backend-opaque labels attached to the volume.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A dynamic storage request forwarded by the host to the provisioner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Requested capacity in bytes; rounded up to whole GiB before the
    /// backend call.
    pub capacity_bytes: u64,
    /// Arbitrary parameters forwarded to the backend as labels.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// The result of provisioning: a descriptor the host can embed in a new
/// persistent volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedVolume {
    /// Descriptor referencing the newly created backend volume.
    pub source: BlockVolumeSource,
    /// Actual capacity allocated by the backend, in GiB.
    pub capacity_gb: u64,
}

/// Number of bytes in one GiB.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Round a byte count up to whole GiB, with a minimum of the backend's
/// 1 GiB granularity for any non-zero request.
pub fn bytes_to_gib_rounded_up(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}
