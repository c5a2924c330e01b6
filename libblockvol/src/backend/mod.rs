//! Block-store control-plane adapter.
//!
//! [`BackendClient`] is the capability trait the mount lifecycle manager
//! and provisioner are written against; [`RemoteBackend`] implements it
//! over the QUIC transport.  Production and test implementations are two
//! variants behind the same trait, injected at construction.

mod remote;

#[cfg(test)]
pub(crate) mod fake;

pub use remote::RemoteBackend;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::VolumeError;
use crate::types::{CreateVolumeOptions, VolumeId};

/// Deadline imposed on a single control-plane call.
pub const BACKEND_DEADLINE: Duration = Duration::from_secs(30);

/// Client for the remote block-store control plane.
///
/// Pure request/response with no local state and no retries — retry and
/// deadline policy belongs to the caller (see [`with_deadline`]).
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Create a new volume; returns the assigned id and the actual size
    /// in GiB, which may exceed the requested capacity.
    ///
    /// Fails with [`VolumeError::BackendUnavailable`] on transport
    /// failure and [`VolumeError::InvalidOptions`] on malformed capacity
    /// or labels.
    async fn create_volume(
        &self,
        options: &CreateVolumeOptions,
    ) -> Result<(VolumeId, u64), VolumeError>;

    /// Attach a volume to `node_id`; returns the local device path the
    /// backend driver exposed on that node.
    ///
    /// Fails with [`VolumeError::VolumeNotFound`],
    /// [`VolumeError::AlreadyAttachedElsewhere`], or
    /// [`VolumeError::BackendUnavailable`].
    async fn attach_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<String, VolumeError>;

    /// Detach a volume from `node_id`.  Idempotent: detaching an
    /// already-detached volume is not an error.
    async fn detach_volume(&self, volume_id: &VolumeId, node_id: &str)
    -> Result<(), VolumeError>;

    /// Delete a volume.  Used only by reclaim paths.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), VolumeError>;
}

/// Run a backend call under [`BACKEND_DEADLINE`] with a single retry on
/// transient transport failure.
///
/// Only [`VolumeError::BackendUnavailable`] (including a deadline
/// expiry, which is indistinguishable from an unreachable backend) is
/// retried; `VolumeNotFound`, `AlreadyAttachedElsewhere`, and
/// `InvalidOptions` propagate immediately.
pub async fn with_deadline<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, VolumeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VolumeError>>,
{
    match tokio::time::timeout(BACKEND_DEADLINE, op()).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e @ VolumeError::BackendUnavailable(_))) => {
            warn!(op = op_name, error = %e, "backend call failed, retrying once");
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            warn!(op = op_name, "backend call exceeded deadline, retrying once");
        }
    }

    match tokio::time::timeout(BACKEND_DEADLINE, op()).await {
        Ok(result) => result,
        Err(_) => Err(VolumeError::BackendUnavailable(format!(
            "{op_name}: deadline exceeded"
        ))),
    }
}
