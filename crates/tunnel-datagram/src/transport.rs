//! Transport abstraction for unreliable datagrams
//!
//! The muxer never talks to a QUIC library directly. It is handed something
//! that can send and receive whole datagrams, which keeps the framing and
//! dispatch logic testable without a network.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        DatagramMuxer / DatagramMuxerV2                   │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ DatagramTransport
//!                           ↓
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ tunnel-datagram-quic         │ in-memory mock (tests)   │
//! └──────────────────────────────┴──────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Datagram too large: {size} bytes (limit {max} bytes)")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("Datagrams not supported: {0}")]
    DatagramsUnsupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A connection able to exchange unreliable datagrams
///
/// Each call sends or receives exactly one complete datagram. Implementations
/// must allow `send_datagram` to be called from many tasks at once; the muxer
/// guarantees a single caller of `receive_datagram`.
#[async_trait]
pub trait DatagramTransport: Send + Sync + Debug {
    /// Send one datagram
    async fn send_datagram(&self, datagram: Bytes) -> TransportResult<()>;

    /// Receive the next datagram
    ///
    /// The returned future must be cancel-safe: dropping it before completion
    /// must not lose a datagram that was already dequeued.
    async fn receive_datagram(&self) -> TransportResult<Bytes>;

    /// Largest datagram the path can currently carry, if datagrams are enabled
    fn max_datagram_size(&self) -> Option<usize>;

    /// Get a unique stable identifier for this connection
    fn connection_id(&self) -> String;
}
