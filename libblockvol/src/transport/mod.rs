//! QUIC transport to the block-store control plane.
//!
//! Only the client side lives here; serving the protocol is the control
//! plane's own concern.

mod client;

pub use client::StoreClient;
