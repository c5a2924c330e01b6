//! In-memory [`BackendClient`] used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::backend::BackendClient;
use crate::error::VolumeError;
use crate::types::{CreateVolumeOptions, VolumeId};

/// Fake control plane: tracks attachments and counts calls so tests can
/// assert on at-most-once detach and retry behavior.  Errors pushed onto
/// the per-operation queues are returned once each, in order, before the
/// fake resumes succeeding.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub volumes: DashMap<VolumeId, u64>,
    pub attachments: DashMap<VolumeId, String>,
    pub create_calls: AtomicUsize,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
    pub create_errors: Mutex<VecDeque<VolumeError>>,
    pub attach_errors: Mutex<VecDeque<VolumeError>>,
    pub detach_errors: Mutex<VecDeque<VolumeError>>,
}

impl FakeBackend {
    pub fn with_volume(id: &str, size_gb: u64) -> Self {
        let fake = Self::default();
        fake.volumes.insert(VolumeId::from(id), size_gb);
        fake
    }

    pub fn push_attach_error(&self, err: VolumeError) {
        self.attach_errors.lock().unwrap().push_back(err);
    }

    pub fn push_detach_error(&self, err: VolumeError) {
        self.detach_errors.lock().unwrap().push_back(err);
    }

    pub fn push_create_error(&self, err: VolumeError) {
        self.create_errors.lock().unwrap().push_back(err);
    }

    fn pop(queue: &Mutex<VecDeque<VolumeError>>) -> Option<VolumeError> {
        queue.lock().unwrap().pop_front()
    }

    pub fn device_path(volume_id: &VolumeId) -> String {
        format!("/dev/blockvol/{volume_id}")
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn create_volume(
        &self,
        options: &CreateVolumeOptions,
    ) -> Result<(VolumeId, u64), VolumeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::pop(&self.create_errors) {
            return Err(err);
        }
        if options.capacity_gb == 0 {
            return Err(VolumeError::InvalidOptions(
                "capacity must be at least 1 GiB".into(),
            ));
        }
        let id = VolumeId(format!("bsd-{}", uuid::Uuid::new_v4()));
        self.volumes.insert(id.clone(), options.capacity_gb);
        Ok((id, options.capacity_gb))
    }

    async fn attach_volume(
        &self,
        volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<String, VolumeError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::pop(&self.attach_errors) {
            return Err(err);
        }
        if !self.volumes.contains_key(volume_id) {
            return Err(VolumeError::VolumeNotFound(volume_id.to_string()));
        }
        let device = Self::device_path(volume_id);
        self.attachments.insert(volume_id.clone(), device.clone());
        Ok(device)
    }

    async fn detach_volume(
        &self,
        volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), VolumeError> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::pop(&self.detach_errors) {
            return Err(err);
        }
        // Idempotent: removing an absent attachment is fine.
        self.attachments.remove(volume_id);
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), VolumeError> {
        if self.attachments.contains_key(volume_id) {
            return Err(VolumeError::InvalidOptions(format!(
                "volume {volume_id} is still attached"
            )));
        }
        self.volumes.remove(volume_id);
        Ok(())
    }
}
