//! Wire messages exchanged with the block-store control plane.
//!
//! [`StoreMessage`] is the top-level envelope for all request and response
//! variants exchanged between this plugin and the control plane over QUIC
//! bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::VolumeError;
use crate::types::{CreateVolumeOptions, VolumeId};

/// Top-level message envelope for the control-plane protocol.
///
/// Each QUIC bi-stream carries exactly one request followed by one
/// response.  The plugin sends a *request* variant and the control plane
/// replies with the corresponding *response* variant (or
/// [`StoreMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume.
    CreateVolume(CreateVolumeOptions),
    /// Attach a volume to a node; the response carries the local device
    /// path the backend driver exposed.
    AttachVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    /// Detach a volume from a node.  Idempotent at the backend: detaching
    /// an already-detached volume succeeds.
    DetachVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    /// Delete a volume.  Used only by reclaim paths.
    DeleteVolume(VolumeId),

    // ----- Responses -------------------------------------------------------
    /// A volume was created; carries the assigned id and actual size.
    VolumeCreated {
        volume_id: VolumeId,
        size_gb: u64,
    },
    /// A volume was attached; carries the local block-device path.
    VolumeAttached {
        device_path: String,
    },
    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(VolumeError),
}

impl std::fmt::Display for StoreMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(opts) => {
                write!(f, "CreateVolume(capacity_gb={})", opts.capacity_gb)
            }
            Self::AttachVolume { volume_id, node_id } => {
                write!(f, "AttachVolume({volume_id} -> {node_id})")
            }
            Self::DetachVolume { volume_id, node_id } => {
                write!(f, "DetachVolume({volume_id} from {node_id})")
            }
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({id})"),
            Self::VolumeCreated { volume_id, size_gb } => {
                write!(f, "VolumeCreated({volume_id}, {size_gb}GiB)")
            }
            Self::VolumeAttached { device_path } => {
                write!(f, "VolumeAttached({device_path})")
            }
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}
