//! QUIC client used by the plugin to issue control-plane requests.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::VolumeError;
use crate::message::StoreMessage;

/// Upper bound on a single control-plane response.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// A lightweight client that sends [`StoreMessage`] requests over a single
/// QUIC connection and returns the control plane's response.
pub struct StoreClient {
    connection: quinn::Connection,
}

impl StoreClient {
    /// Establish a new QUIC connection to the control plane at `addr`.
    ///
    /// * `addr` — socket address of the control-plane endpoint
    /// * `server_name` — TLS SNI name that must match a SAN in the
    ///   control plane's certificate
    /// * `tls_config` — client TLS configuration
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, VolumeError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| VolumeError::Transport(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let bind_addr: SocketAddr = "0.0.0.0:0"
            .parse()
            .map_err(VolumeError::internal)?;
        let mut endpoint = quinn::Endpoint::client(bind_addr).map_err(VolumeError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(VolumeError::transport)?
            .await
            .map_err(VolumeError::transport)?;

        debug!(%addr, %server_name, "control-plane QUIC connection established");
        Ok(Self { connection })
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call opens a new bi-directional QUIC stream, writes the
    /// JSON-serialized request, finishes the send side, then reads the
    /// full response and deserializes it.  No retries are performed here;
    /// retry policy belongs to the caller.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &StoreMessage) -> Result<StoreMessage, VolumeError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(VolumeError::backend)?;

        // Serialize and send.
        let payload = serde_json::to_vec(msg).map_err(VolumeError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(VolumeError::backend)?;
        send.finish().map_err(VolumeError::backend)?;

        // Read the full response.
        let buf = recv
            .read_to_end(MAX_RESPONSE_BYTES)
            .await
            .map_err(VolumeError::backend)?;

        let response: StoreMessage =
            serde_json::from_slice(&buf).map_err(VolumeError::transport)?;
        debug!(%response, "control-plane response received");
        Ok(response)
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}
