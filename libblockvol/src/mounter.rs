//! Mount lifecycle manager.
//!
//! [`VolumeMounter`] drives set-up (attach, format if needed, mount,
//! record) and [`VolumeUnmounter`] drives teardown (unmount, detach when
//! the last reference on this node goes away).  Both operate on a shared
//! [`MountTable`], whose per-volume locks serialize concurrent set-up and
//! teardown calls for different pods that share a backend volume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BACKEND_DEADLINE, BackendClient, with_deadline};
use crate::error::VolumeError;
use crate::mount::MountFacility;
use crate::types::{BlockVolumeSource, MountRecord, VolumeId};

// ---------------------------------------------------------------------------
// Shared mount bookkeeping
// ---------------------------------------------------------------------------

/// Node-local mount bookkeeping shared by all mounters and unmounters a
/// plugin hands out.
///
/// Records are keyed by host path.  The per-volume-id mutexes serialize
/// the insert-on-set-up and remove-and-check-empty-on-teardown critical
/// sections, so two concurrent teardowns of pods sharing a volume can
/// never both observe "no remaining references" and double-detach.
#[derive(Default)]
pub struct MountTable {
    records: DashMap<String, MountRecord>,
    locks: DashMap<VolumeId, Arc<Mutex<()>>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding all record mutations for `volume_id`.
    fn lock_for(&self, volume_id: &VolumeId) -> Arc<Mutex<()>> {
        self.locks
            .entry(volume_id.clone())
            .or_default()
            .clone()
    }

    /// Look up the record for a host path.
    pub fn record(&self, host_path: &str) -> Option<MountRecord> {
        self.records.get(host_path).map(|r| r.clone())
    }

    /// Number of records on this node referencing `volume_id`.
    fn references(&self, volume_id: &VolumeId) -> usize {
        self.records
            .iter()
            .filter(|r| &r.volume_id == volume_id)
            .count()
    }

    /// Number of live mount records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Set-up
// ---------------------------------------------------------------------------

/// Mounts one backend volume for one pod.
///
/// Owns a resolved descriptor and the derived host path; all external
/// effects go through the injected [`BackendClient`] and
/// [`MountFacility`].
pub struct VolumeMounter {
    pub(crate) source: BlockVolumeSource,
    pub(crate) read_only: bool,
    pub(crate) pod_uid: String,
    pub(crate) host_path: PathBuf,
    pub(crate) node_id: String,
    pub(crate) backend: Arc<dyn BackendClient>,
    pub(crate) mount: Arc<dyn MountFacility>,
    pub(crate) table: Arc<MountTable>,
}

impl VolumeMounter {
    /// The deterministic host path this mounter mounts at.  Pure function
    /// of (pod UID, volume name); the same path is later handed to
    /// teardown by the host.
    pub fn get_path(&self) -> &Path {
        &self.host_path
    }

    /// Set up the volume at the derived host path.
    pub async fn set_up(&self) -> Result<(), VolumeError> {
        let dir = self.host_path.clone();
        self.set_up_at(&dir).await
    }

    /// Attach the backend volume to this node, format it if it carries no
    /// filesystem signature (and formatting is permitted), mount it at
    /// `dir`, and record the mount.
    ///
    /// Idempotent: if `dir` is already mounted for the same volume id,
    /// returns success without attaching or mounting again.
    #[instrument(skip(self), fields(volume_id = %self.source.volume_id, pod_uid = %self.pod_uid))]
    pub async fn set_up_at(&self, dir: &Path) -> Result<(), VolumeError> {
        let volume_id = &self.source.volume_id;
        let lock = self.table.lock_for(volume_id);
        let _guard = lock.lock().await;

        let path_key = dir.display().to_string();
        if let Some(existing) = self.table.record(&path_key) {
            if &existing.volume_id == volume_id && self.mount.is_mountpoint(dir).await {
                debug!(path = %path_key, "already mounted, idempotent set-up");
                return Ok(());
            }
            // Stale record: the path is no longer mounted (or the record
            // belongs to a different volume after a host re-derivation).
            // Drop it and run the full set-up again.
            warn!(path = %path_key, "dropping stale mount record");
            self.table.records.remove(&path_key);
        }

        let device = with_deadline("attach_volume", || {
            let backend = Arc::clone(&self.backend);
            let volume_id = volume_id.clone();
            let node_id = self.node_id.clone();
            async move { backend.attach_volume(&volume_id, &node_id).await }
        })
        .await?;

        let device = match &self.source.partition {
            Some(partition) => match self.mount.partition_device(&device, partition).await {
                Ok(node) => node,
                Err(e) => {
                    self.detach_orphan(volume_id).await;
                    return Err(e);
                }
            },
            None => device,
        };

        if let Err(e) = self
            .mount
            .format_and_mount(&device, dir, &self.source.fs_type, self.read_only)
            .await
        {
            self.detach_orphan(volume_id).await;
            return Err(e);
        }

        self.table.records.insert(
            path_key.clone(),
            MountRecord {
                host_path: path_key,
                pod_uid: self.pod_uid.clone(),
                volume_id: volume_id.clone(),
            },
        );

        info!(device, path = %dir.display(), read_only = self.read_only, "volume set up");
        Ok(())
    }

    /// Best-effort detach after a failed set-up step, so a volume attached
    /// by this call is not left orphaned.  Skipped when another pod on
    /// this node still references the volume.
    async fn detach_orphan(&self, volume_id: &VolumeId) {
        if self.table.references(volume_id) > 0 {
            return;
        }
        if let Err(e) = self
            .backend
            .detach_volume(volume_id, &self.node_id)
            .await
        {
            warn!(%volume_id, error = %e, "failed to detach after aborted set-up");
        }
    }
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Unmounts one pod's mount of a backend volume, detaching the volume
/// from this node when the last referencing pod is gone.
pub struct VolumeUnmounter {
    pub(crate) volume_name: String,
    pub(crate) pod_uid: String,
    pub(crate) host_path: PathBuf,
    pub(crate) node_id: String,
    pub(crate) backend: Arc<dyn BackendClient>,
    pub(crate) mount: Arc<dyn MountFacility>,
    pub(crate) table: Arc<MountTable>,
}

impl VolumeUnmounter {
    /// The deterministic host path this unmounter tears down.  Matches the
    /// path the corresponding mounter mounted at.
    pub fn get_path(&self) -> &Path {
        &self.host_path
    }

    /// Tear down the mount at the derived host path.
    pub async fn tear_down(&self) -> Result<(), VolumeError> {
        let dir = self.host_path.clone();
        self.tear_down_at(&dir).await
    }

    /// Unmount `dir`, remove its mount record, and detach the volume from
    /// this node if no other pod references it.
    ///
    /// A call with no corresponding record is a no-op success.  An
    /// unmount failure is [`VolumeError::TeardownFailed`] and keeps the
    /// record.  A detach failure after a successful unmount is logged and
    /// returned, also keeping the record, so a re-invocation by the host
    /// skips the (now no-op) unmount and retries the detach; the volume
    /// is never re-mounted.
    #[instrument(skip(self), fields(pod_uid = %self.pod_uid, volume_name = %self.volume_name))]
    pub async fn tear_down_at(&self, dir: &Path) -> Result<(), VolumeError> {
        let path_key = dir.display().to_string();

        // The lock is keyed by volume id, which is only known through the
        // record; an unlocked miss here is fine since nothing exists to
        // race against.
        let Some(record) = self.table.record(&path_key) else {
            debug!(path = %path_key, "no mount record, nothing to tear down");
            return Ok(());
        };

        let lock = self.table.lock_for(&record.volume_id);
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent teardown of the same path
        // may have finished while we waited.
        let Some(record) = self.table.record(&path_key) else {
            return Ok(());
        };

        if self.mount.is_mountpoint(dir).await {
            self.mount.unmount(dir).await?;
        }

        // Detach only when this record is the volume's last reference on
        // this node.  The record is still in the table at this point, so
        // a count of one means "only us".
        if self.table.references(&record.volume_id) == 1 {
            let detach = tokio::time::timeout(
                BACKEND_DEADLINE,
                self.backend.detach_volume(&record.volume_id, &self.node_id),
            )
            .await
            .unwrap_or_else(|_| {
                Err(VolumeError::BackendUnavailable(
                    "detach_volume: deadline exceeded".into(),
                ))
            });

            if let Err(e) = detach {
                // The pod's unmount already succeeded; keep the record so
                // the host's teardown retry revisits the detach.
                warn!(volume_id = %record.volume_id, error = %e,
                    "unmounted but failed to detach, will retry on next teardown");
                return Err(e);
            }
            info!(volume_id = %record.volume_id, "volume detached from node");
        }

        self.table.records.remove(&path_key);
        info!(path = %path_key, "volume torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::mount::fake::FakeMountFacility;
    use std::sync::atomic::Ordering;

    struct Fixture {
        backend: Arc<FakeBackend>,
        mount: Arc<FakeMountFacility>,
        table: Arc<MountTable>,
    }

    impl Fixture {
        fn new(backend: FakeBackend, mount: FakeMountFacility) -> Self {
            Self {
                backend: Arc::new(backend),
                mount: Arc::new(mount),
                table: Arc::new(MountTable::new()),
            }
        }

        fn mounter(&self, source: BlockVolumeSource, read_only: bool, pod_uid: &str) -> VolumeMounter {
            VolumeMounter {
                host_path: PathBuf::from(format!("/plugins/test/{pod_uid}/data")),
                source,
                read_only,
                pod_uid: pod_uid.to_owned(),
                node_id: "node-01".to_owned(),
                backend: self.backend.clone(),
                mount: self.mount.clone(),
                table: self.table.clone(),
            }
        }

        fn unmounter(&self, pod_uid: &str) -> VolumeUnmounter {
            VolumeUnmounter {
                volume_name: "data".to_owned(),
                pod_uid: pod_uid.to_owned(),
                host_path: PathBuf::from(format!("/plugins/test/{pod_uid}/data")),
                node_id: "node-01".to_owned(),
                backend: self.backend.clone(),
                mount: self.mount.clone(),
                table: self.table.clone(),
            }
        }
    }

    fn source(id: &str) -> BlockVolumeSource {
        BlockVolumeSource::new(VolumeId::from(id), "ext4")
    }

    fn device(id: &str) -> String {
        FakeBackend::device_path(&VolumeId::from(id))
    }

    #[tokio::test]
    async fn set_up_attaches_formats_mounts_and_records() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        let mounter = fx.mounter(source("v1"), false, "p1");

        mounter.set_up().await.unwrap();

        assert_eq!(fx.backend.attach_calls.load(Ordering::SeqCst), 1);
        // Unformatted device gets a filesystem before mounting.
        assert_eq!(fx.mount.format_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.mount.mount_calls.load(Ordering::SeqCst), 1);

        let record = fx.table.record("/plugins/test/p1/data").expect("record");
        assert_eq!(record.pod_uid, "p1");
        assert_eq!(record.volume_id, VolumeId::from("v1"));
    }

    #[tokio::test]
    async fn set_up_is_idempotent() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        let mounter = fx.mounter(source("v1"), false, "p1");

        mounter.set_up().await.unwrap();
        mounter.set_up().await.unwrap();

        // One record, one mount, one attach; the second call is a no-op.
        assert_eq!(fx.table.len(), 1);
        assert_eq!(fx.mount.mount_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.backend.attach_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_up_skips_format_for_formatted_device() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::preformatted(&device("v1"), "ext4"),
        );
        fx.mounter(source("v1"), false, "p1").set_up().await.unwrap();
        assert_eq!(fx.mount.format_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.mount.mount_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_up_read_only_never_formats() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        let err = fx
            .mounter(source("v1"), true, "p1")
            .set_up()
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::MountFailed { .. }));
        assert_eq!(fx.mount.format_calls.load(Ordering::SeqCst), 0);
        // The aborted set-up must not leave the volume attached.
        assert!(fx.backend.attachments.is_empty());
    }

    #[tokio::test]
    async fn set_up_retries_transient_attach_failure() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        fx.backend
            .push_attach_error(VolumeError::BackendUnavailable("connection reset".into()));

        fx.mounter(source("v1"), false, "p1").set_up().await.unwrap();
        assert_eq!(fx.backend.attach_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.table.len(), 1);
    }

    #[tokio::test]
    async fn set_up_does_not_retry_missing_volume() {
        let fx = Fixture::new(FakeBackend::default(), FakeMountFacility::default());
        let err = fx
            .mounter(source("missing"), false, "p1")
            .set_up()
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::VolumeNotFound(_)));
        assert_eq!(fx.backend.attach_calls.load(Ordering::SeqCst), 1);
        assert!(fx.table.is_empty());
    }

    #[tokio::test]
    async fn set_up_with_missing_partition_detaches() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        let mut src = source("v1");
        src.partition = Some("2".into());

        let err = fx.mounter(src, false, "p1").set_up().await.unwrap_err();
        assert!(matches!(err, VolumeError::PartitionNotFound { .. }));
        assert!(fx.backend.attachments.is_empty());
        assert!(fx.table.is_empty());
    }

    #[tokio::test]
    async fn set_up_mounts_selected_partition() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        let partition_node = format!("{}p1", device("v1"));
        fx.mount.partitions.insert(partition_node.clone());
        fx.mount.formatted.insert(partition_node.clone(), "ext4".into());

        let mut src = source("v1");
        src.partition = Some("1".into());
        fx.mounter(src, false, "p1").set_up().await.unwrap();

        let (mounted_device, _) = fx
            .mount
            .mounts
            .get("/plugins/test/p1/data")
            .map(|m| m.clone())
            .expect("mounted");
        assert_eq!(mounted_device, partition_node);
    }

    #[tokio::test]
    async fn tear_down_unmounts_and_detaches_last_reference() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        fx.mounter(source("v1"), false, "p1").set_up().await.unwrap();

        fx.unmounter("p1").tear_down().await.unwrap();

        assert!(fx.table.is_empty());
        assert!(fx.mount.mounts.is_empty());
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 1);
        assert!(fx.backend.attachments.is_empty());
    }

    #[tokio::test]
    async fn tear_down_without_record_is_noop() {
        let fx = Fixture::new(FakeBackend::default(), FakeMountFacility::default());
        fx.unmounter("p1").tear_down().await.unwrap();
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tear_down_unmount_failure_is_retryable() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        fx.mounter(source("v1"), false, "p1").set_up().await.unwrap();
        fx.mount.push_unmount_error(VolumeError::TeardownFailed {
            path: "/plugins/test/p1/data".into(),
            reason: "device busy".into(),
        });

        let err = fx.unmounter("p1").tear_down().await.unwrap_err();
        assert!(matches!(err, VolumeError::TeardownFailed { .. }));
        // Record kept; no detach happened.
        assert_eq!(fx.table.len(), 1);
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 0);

        // Host re-invokes teardown; this time it succeeds end to end.
        fx.unmounter("p1").tear_down().await.unwrap();
        assert!(fx.table.is_empty());
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tear_down_detach_failure_keeps_record_for_retry() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        fx.mounter(source("v1"), false, "p1").set_up().await.unwrap();
        fx.backend
            .push_detach_error(VolumeError::BackendUnavailable("control plane down".into()));

        let err = fx.unmounter("p1").tear_down().await.unwrap_err();
        assert!(matches!(err, VolumeError::BackendUnavailable(_)));
        // Unmounted, but the record survives so the retry reaches detach.
        assert!(fx.mount.mounts.is_empty());
        assert_eq!(fx.table.len(), 1);

        fx.unmounter("p1").tear_down().await.unwrap();
        assert!(fx.table.is_empty());
        assert!(fx.backend.attachments.is_empty());
    }

    #[tokio::test]
    async fn shared_volume_detaches_only_after_last_pod() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v2", 4),
            FakeMountFacility::preformatted(&device("v2"), "ext4"),
        );
        let mut src = source("v2");
        src.read_only = true;

        fx.mounter(src.clone(), true, "p1").set_up().await.unwrap();
        fx.mounter(src, true, "p2").set_up().await.unwrap();
        assert_eq!(fx.table.len(), 2);

        // First teardown unmounts p1's path but leaves the volume attached
        // while p2's mount remains.
        fx.unmounter("p1").tear_down().await.unwrap();
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 0);
        assert!(fx.backend.attachments.contains_key(&VolumeId::from("v2")));

        fx.unmounter("p2").tear_down().await.unwrap();
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 1);
        assert!(fx.backend.attachments.is_empty());
    }

    #[tokio::test]
    async fn concurrent_tear_downs_detach_at_most_once() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v2", 4),
            FakeMountFacility::preformatted(&device("v2"), "ext4"),
        );
        let mut src = source("v2");
        src.read_only = true;

        fx.mounter(src.clone(), true, "p1").set_up().await.unwrap();
        fx.mounter(src, true, "p2").set_up().await.unwrap();

        let u1 = fx.unmounter("p1");
        let u2 = fx.unmounter("p2");
        let (r1, r2) = tokio::join!(u1.tear_down(), u2.tear_down());
        r1.unwrap();
        r2.unwrap();

        assert!(fx.table.is_empty());
        assert_eq!(fx.backend.detach_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn path_round_trip_matches_between_set_up_and_tear_down() {
        let fx = Fixture::new(
            FakeBackend::with_volume("v1", 4),
            FakeMountFacility::default(),
        );
        let mounter = fx.mounter(source("v1"), false, "p1");
        let unmounter = fx.unmounter("p1");
        assert_eq!(mounter.get_path(), unmounter.get_path());

        mounter.set_up().await.unwrap();
        unmounter.tear_down().await.unwrap();
        assert!(fx.table.is_empty());
    }
}
