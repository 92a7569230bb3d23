//! QUIC listener and connector for datagram tunnels

use quinn::Endpoint;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};
use tunnel_datagram::{TransportError, TransportResult};

use crate::config::QuicConfig;
use crate::connection::QuicDatagramConnection;

/// QUIC listener for accepting incoming connections
#[derive(Debug)]
pub struct QuicListener {
    endpoint: Endpoint,
    config: Arc<QuicConfig>,
}

impl QuicListener {
    pub fn new(bind_addr: SocketAddr, config: Arc<QuicConfig>) -> TransportResult<Self> {
        config.validate()?;

        let server_config = config.build_server_config()?;

        let endpoint =
            Endpoint::server(server_config, bind_addr).map_err(TransportError::IoError)?;

        let local_addr = endpoint.local_addr().map_err(TransportError::IoError)?;

        info!("QUIC listener bound to {}", local_addr);

        Ok(Self { endpoint, config })
    }

    /// Wait for the next established connection
    ///
    /// Failed handshakes are logged and skipped. Returns an error once the
    /// endpoint is closed.
    pub async fn accept(&self) -> TransportResult<(QuicDatagramConnection, SocketAddr)> {
        loop {
            let Some(incoming) = self.endpoint.accept().await else {
                return Err(TransportError::ConnectionError(
                    "QUIC endpoint closed".to_string(),
                ));
            };

            let remote = incoming.remote_address();
            debug!("Incoming QUIC connection from {}", remote);

            match incoming.await {
                Ok(connection) => {
                    info!("QUIC connection established from {}", remote);
                    return Ok((QuicDatagramConnection::new(connection), remote));
                }
                Err(e) => {
                    error!("Failed to establish QUIC connection from {}: {}", remote, e);
                    continue;
                }
            }
        }
    }

    pub fn config(&self) -> &QuicConfig {
        &self.config
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.endpoint.local_addr().map_err(TransportError::IoError)
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"Listener closed");
        info!("QUIC listener closed");
    }
}

/// QUIC connector for establishing outgoing connections
#[derive(Debug)]
pub struct QuicConnector {
    endpoint: Endpoint,
    config: Arc<QuicConfig>,
}

impl QuicConnector {
    pub fn new(config: Arc<QuicConfig>) -> TransportResult<Self> {
        config.validate()?;

        let client_config = config.build_client_config()?;

        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))
            .map_err(TransportError::IoError)?;

        endpoint.set_default_client_config(client_config);

        debug!("QUIC connector created");

        Ok(Self { endpoint, config })
    }

    pub fn config(&self) -> &QuicConfig {
        &self.config
    }

    /// Wait for every connection from this connector to finish closing
    ///
    /// Lets the CONNECTION_CLOSE frame reach the peer before the process exits.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }

    /// Connect and confirm the peer negotiated datagram support
    pub async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
    ) -> TransportResult<QuicDatagramConnection> {
        debug!("Connecting to QUIC server: {} ({})", server_name, addr);

        let connecting = self
            .endpoint
            .connect(addr, server_name)
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        let connection = connecting
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        let Some(max) = connection.max_datagram_size() else {
            connection.close(0u32.into(), b"datagrams unsupported");
            return Err(TransportError::DatagramsUnsupported(format!(
                "{} did not negotiate datagrams",
                addr
            )));
        };

        info!(
            "QUIC connection established to {} ({}), max datagram {} bytes",
            server_name, addr, max
        );

        Ok(QuicDatagramConnection::new(connection))
    }
}
