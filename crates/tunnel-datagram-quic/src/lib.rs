//! QUIC datagram transport using quinn
//!
//! Binds the [`tunnel_datagram`] muxers to real QUIC connections. Endpoints
//! are configured with the unreliable-datagram extension enabled and an
//! initial MTU large enough to carry a full
//! [`MAX_DATAGRAM_FRAME_SIZE`](tunnel_datagram::MAX_DATAGRAM_FRAME_SIZE) frame
//! before path MTU discovery has run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tunnel_datagram::{DatagramMuxerV2, MuxerConfig};
//! use tunnel_datagram_quic::{QuicConfig, QuicConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = QuicConnector::new(Arc::new(QuicConfig::client_insecure()))?;
//! let connection = connector.connect("127.0.0.1:4433".parse()?, "localhost").await?;
//!
//! let muxer = DatagramMuxerV2::new(Arc::new(connection), MuxerConfig::default())?;
//! muxer.mux_packet(b"raw packet").await?;
//! # Ok(())
//! # }
//! ```

// Initialize rustls crypto provider once globally
// This MUST be called before any rustls/QUIC operations
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

pub mod cert;
pub mod config;
pub mod connection;
pub mod listener;

pub use cert::{generate_self_signed_cert, SelfSignedCertificate, SelfSignedError};
pub use config::{QuicConfig, ServerIdentity, DEFAULT_ALPN};
pub use connection::{DatagramConnectionStats, QuicDatagramConnection};
pub use listener::{QuicConnector, QuicListener};
