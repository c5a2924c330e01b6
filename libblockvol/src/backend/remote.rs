//! [`BackendClient`] implementation over the QUIC control-plane protocol.

use async_trait::async_trait;

use crate::backend::BackendClient;
use crate::error::VolumeError;
use crate::message::StoreMessage;
use crate::transport::StoreClient;
use crate::types::{CreateVolumeOptions, VolumeId};

/// Backend adapter that maps [`BackendClient`] calls onto
/// [`StoreMessage`] requests over a [`StoreClient`] connection.
pub struct RemoteBackend {
    client: StoreClient,
}

impl RemoteBackend {
    /// Wrap an established control-plane connection.
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendClient for RemoteBackend {
    async fn create_volume(
        &self,
        options: &CreateVolumeOptions,
    ) -> Result<(VolumeId, u64), VolumeError> {
        let response = self
            .client
            .request(&StoreMessage::CreateVolume(options.clone()))
            .await?;
        decode::created(response)
    }

    async fn attach_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<String, VolumeError> {
        let response = self
            .client
            .request(&StoreMessage::AttachVolume {
                volume_id: volume_id.clone(),
                node_id: node_id.to_owned(),
            })
            .await?;
        decode::attached(response)
    }

    async fn detach_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), VolumeError> {
        let response = self
            .client
            .request(&StoreMessage::DetachVolume {
                volume_id: volume_id.clone(),
                node_id: node_id.to_owned(),
            })
            .await?;
        decode::ack(response)
    }

    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), VolumeError> {
        let response = self
            .client
            .request(&StoreMessage::DeleteVolume(volume_id.clone()))
            .await?;
        decode::ack(response)
    }
}

/// Pure response-decoding helpers, split out so the request/response
/// mapping is testable without a live connection.
mod decode {
    use super::*;

    pub fn created(response: StoreMessage) -> Result<(VolumeId, u64), VolumeError> {
        match response {
            StoreMessage::VolumeCreated { volume_id, size_gb } => Ok((volume_id, size_gb)),
            other => unexpected(other),
        }
    }

    pub fn attached(response: StoreMessage) -> Result<String, VolumeError> {
        match response {
            StoreMessage::VolumeAttached { device_path } => Ok(device_path),
            other => unexpected(other),
        }
    }

    pub fn ack(response: StoreMessage) -> Result<(), VolumeError> {
        match response {
            StoreMessage::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    fn unexpected<T>(response: StoreMessage) -> Result<T, VolumeError> {
        match response {
            StoreMessage::Error(e) => Err(e),
            other => Err(VolumeError::Transport(format!(
                "unexpected control-plane response: {other}"
            ))),
        }
    }
}
