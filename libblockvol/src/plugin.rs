//! Orchestration-host plugin contract.
//!
//! [`BlockVolumePlugin`] is the entry point the host drives: it claims
//! specs carrying a [`BlockVolumeSource`], and hands out mounters,
//! unmounters, and provisioners for them.  Every collaborator — the host
//! path layout, the backend client, the mount facility — is injected at
//! construction; there is no global registration and no singleton host
//! reference.

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::BackendClient;
use crate::error::VolumeError;
use crate::mount::MountFacility;
use crate::mounter::{MountTable, VolumeMounter, VolumeUnmounter};
use crate::provision::VolumeProvisioner;
use crate::types::{ProvisionRequest, VolumeSpec};

/// Qualified plugin name, as reported to the host.
///
/// Follows domain-name notation so it cannot collide with other plugins
/// the host has loaded.
pub const PLUGIN_NAME: &str = "rk8s.io/blockvol";

/// Escape a qualified plugin name for use as a single path component:
/// `rk8s.io/blockvol` becomes `rk8s.io~blockvol`.
pub fn escape_plugin_name(name: &str) -> String {
    name.replace('/', "~")
}

// ---------------------------------------------------------------------------
// Host interface
// ---------------------------------------------------------------------------

/// The slice of the orchestration host this plugin consumes: the layout
/// of per-pod volume directories.
pub trait VolumeHost: Send + Sync {
    /// The host-local directory where `volume_name` of pod `pod_uid` is
    /// mounted for the plugin directory `plugin_dir` (an escaped plugin
    /// name).
    ///
    /// Must be a pure function of its arguments so set-up and teardown
    /// calls issued at different times derive the same path.
    fn pod_volume_dir(&self, pod_uid: &str, plugin_dir: &str, volume_name: &str) -> PathBuf;
}

/// Production [`VolumeHost`]: lays pod volume directories out as
/// `<base>/<plugin_dir>/<pod_uid>/<volume_name>`.
pub struct NodeVolumeHost {
    base: PathBuf,
}

impl NodeVolumeHost {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl VolumeHost for NodeVolumeHost {
    fn pod_volume_dir(&self, pod_uid: &str, plugin_dir: &str, volume_name: &str) -> PathBuf {
        self.base.join(plugin_dir).join(pod_uid).join(volume_name)
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// Volume plugin for externally managed block volumes.
///
/// One instance per node process; the mounters and unmounters it creates
/// share its [`MountTable`], which is what makes last-reference detach
/// decisions correct across concurrent pod lifecycles.
pub struct BlockVolumePlugin {
    host: Arc<dyn VolumeHost>,
    backend: Arc<dyn BackendClient>,
    mount: Arc<dyn MountFacility>,
    table: Arc<MountTable>,
    node_id: String,
}

impl BlockVolumePlugin {
    /// Construct the plugin with its injected collaborators.
    ///
    /// `node_id` identifies this node to the backend for attach and
    /// detach calls.
    pub fn new(
        host: Arc<dyn VolumeHost>,
        backend: Arc<dyn BackendClient>,
        mount: Arc<dyn MountFacility>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            host,
            backend,
            mount,
            table: Arc::new(MountTable::new()),
            node_id: node_id.into(),
        }
    }

    /// Qualified plugin name.
    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    /// Whether this plugin can handle `spec`: true iff its inline volume
    /// or persistent-volume source carries a block-volume descriptor.
    pub fn can_support(&self, spec: &VolumeSpec) -> bool {
        spec.block_volume_source().is_ok()
    }

    /// Derive the host path for a (pod, volume) pair.  Deterministic, so
    /// the path handed to teardown always matches the one set-up used.
    fn path_for(&self, pod_uid: &str, volume_name: &str) -> PathBuf {
        self.host
            .pod_volume_dir(pod_uid, &escape_plugin_name(PLUGIN_NAME), volume_name)
    }

    /// Build a mounter for `spec` on behalf of pod `pod_uid`.
    ///
    /// Fails with [`VolumeError::UnsupportedSpecKind`] when the spec does
    /// not carry a block-volume descriptor.
    pub fn new_mounter(
        &self,
        spec: &VolumeSpec,
        pod_uid: &str,
    ) -> Result<VolumeMounter, VolumeError> {
        let (source, read_only) = spec.block_volume_source()?;
        Ok(VolumeMounter {
            source: source.clone(),
            read_only,
            pod_uid: pod_uid.to_owned(),
            host_path: self.path_for(pod_uid, &spec.name),
            node_id: self.node_id.clone(),
            backend: Arc::clone(&self.backend),
            mount: Arc::clone(&self.mount),
            table: Arc::clone(&self.table),
        })
    }

    /// Build an unmounter for a (volume name, pod) pair.
    ///
    /// Teardown needs no spec: the host only remembers the pair, and the
    /// mount record holds the volume identity.
    pub fn new_unmounter(&self, volume_name: &str, pod_uid: &str) -> VolumeUnmounter {
        VolumeUnmounter {
            volume_name: volume_name.to_owned(),
            pod_uid: pod_uid.to_owned(),
            host_path: self.path_for(pod_uid, volume_name),
            node_id: self.node_id.clone(),
            backend: Arc::clone(&self.backend),
            mount: Arc::clone(&self.mount),
            table: Arc::clone(&self.table),
        }
    }

    /// Build a provisioner for a dynamic storage request.
    pub fn new_provisioner(&self, request: ProvisionRequest) -> VolumeProvisioner {
        VolumeProvisioner {
            request,
            backend: Arc::clone(&self.backend),
        }
    }
}
