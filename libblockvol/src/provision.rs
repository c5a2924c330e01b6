//! Dynamic provisioning.
//!
//! [`VolumeProvisioner`] satisfies a host storage request by creating a
//! backend volume and returning a descriptor the host can embed in a new
//! persistent volume.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::backend::{BackendClient, with_deadline};
use crate::error::VolumeError;
use crate::types::{
    BlockVolumeSource, CreateVolumeOptions, ProvisionRequest, ProvisionedVolume,
    bytes_to_gib_rounded_up, default_fs_type,
};

/// Provisions one backend volume for one dynamic storage request.
///
/// Stateless beyond the request it was built with: one call, one result,
/// and nothing retained on failure since volume creation is all-or-nothing
/// at the backend.
pub struct VolumeProvisioner {
    pub(crate) request: ProvisionRequest,
    pub(crate) backend: Arc<dyn BackendClient>,
}

impl VolumeProvisioner {
    /// Create the volume and build its descriptor.
    ///
    /// The requested capacity is rounded up to whole GiB, the backend's
    /// minimum granularity.  The returned descriptor uses the default
    /// filesystem type with read-write access.
    #[instrument(skip(self), fields(capacity_bytes = self.request.capacity_bytes))]
    pub async fn provision(&self) -> Result<ProvisionedVolume, VolumeError> {
        let capacity_gb = bytes_to_gib_rounded_up(self.request.capacity_bytes);
        if capacity_gb == 0 {
            return Err(VolumeError::InvalidOptions(
                "requested capacity must be greater than zero".into(),
            ));
        }

        let options = CreateVolumeOptions {
            capacity_gb,
            labels: self.request.parameters.clone(),
        };

        let (volume_id, size_gb) = with_deadline("create_volume", || {
            let backend = Arc::clone(&self.backend);
            let options = options.clone();
            async move { backend.create_volume(&options).await }
        })
        .await?;

        info!(%volume_id, size_gb, "volume provisioned");
        Ok(ProvisionedVolume {
            source: BlockVolumeSource::new(volume_id, default_fs_type()),
            capacity_gb: size_gb,
        })
    }
}
