//! Plugin error types.
//!
//! All errors in the `libblockvol` crate are represented by the
//! [`VolumeError`] enum, which derives [`thiserror::Error`] for ergonomic
//! error handling and also implements [`Serialize`]/[`Deserialize`] so
//! errors can travel across the control-plane transport.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for volume plugin operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum VolumeError {
    /// The workload spec does not carry this backend's descriptor; the
    /// host must pick a different plugin.
    #[error("volume spec {0:?} carries no block-volume source")]
    UnsupportedSpecKind(String),

    /// The block-store control plane could not be reached or failed at
    /// the transport level.  Transient; safe to retry.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The referenced volume does not exist at the backend.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The volume is attached to a different node and the backend refuses
    /// a second writable attachment.  Requires operator intervention.
    #[error("volume {volume_id} already attached to node {node_id}")]
    AlreadyAttachedElsewhere {
        /// The contested volume.
        volume_id: String,
        /// The node currently holding the attachment.
        node_id: String,
    },

    /// The caller supplied malformed capacity or labels.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The requested partition does not exist on the attached device.
    #[error("partition {partition} not found on device {device}")]
    PartitionNotFound {
        /// Device path the partition was expected on.
        device: String,
        /// Requested partition suffix.
        partition: String,
    },

    /// A format or mount operation failed during set-up.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The unmount step of teardown failed.  The host is expected to
    /// re-invoke teardown later.
    #[error("teardown failed at {path}: {reason}")]
    TeardownFailed {
        /// Mount path that could not be torn down.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A transport-level error below the backend protocol.
    #[error("transport error: {0}")]
    Transport(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VolumeError {
    /// Create a [`VolumeError::BackendUnavailable`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendUnavailable(e.to_string())
    }

    /// Create a [`VolumeError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`VolumeError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Whether the caller may retry the failed operation.
    ///
    /// Transient transport failures and failed teardowns are retried by
    /// the host; spec-kind, not-found, attachment-conflict, and
    /// bad-option errors require a different plugin, operator action, or
    /// a configuration fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::TeardownFailed { .. } | Self::Transport(_)
        )
    }
}
