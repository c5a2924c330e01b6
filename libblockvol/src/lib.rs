//! # libblockvol — externally managed block volumes for RK8s
//!
//! `libblockvol` lets an RK8s-style orchestration host attach block
//! volumes from a distributed block-store control plane to pod sandboxes
//! on a worker node.  It follows the RK8s architecture conventions (Tokio
//! async runtime, `tracing` for observability, `thiserror` for structured
//! errors) and talks to the control plane over QUIC (via [`quinn`]).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, specs, descriptors, `MountRecord`. |
//! | [`error`] | [`VolumeError`] enum covering all failure modes. |
//! | [`message`] | [`StoreMessage`] protocol envelope for the control-plane wire. |
//! | [`transport`] | QUIC client built on `quinn`. |
//! | [`backend`] | [`BackendClient`] trait and the remote adapter. |
//! | [`mount`] | [`MountFacility`] trait and the host-kernel implementation. |
//! | [`mounter`] | Mount lifecycle: set-up, teardown, last-reference detach. |
//! | [`provision`] | Dynamic provisioning of new backend volumes. |
//! | [`plugin`] | The host-facing plugin contract and path layout. |

pub mod backend;
pub mod error;
pub mod message;
pub mod mount;
pub mod mounter;
pub mod plugin;
pub mod provision;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::{BackendClient, RemoteBackend};
pub use error::VolumeError;
pub use message::StoreMessage;
pub use mount::{MountFacility, SystemMounter};
pub use mounter::{MountTable, VolumeMounter, VolumeUnmounter};
pub use plugin::{BlockVolumePlugin, NodeVolumeHost, PLUGIN_NAME, VolumeHost};
pub use provision::VolumeProvisioner;
pub use types::*;
