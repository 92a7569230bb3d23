//! Muxer errors

use crate::transport::TransportError;
use thiserror::Error;

/// Errors produced while framing, parsing or serving datagrams
#[derive(Debug, Error)]
pub enum DatagramError {
    /// A locally built frame would exceed the maximum datagram frame size.
    /// Always raised before anything is handed to the transport.
    #[error("Datagram frame too large: {size} bytes exceeds maximum of {max} bytes")]
    Oversize { size: usize, max: usize },

    /// An inbound datagram is too short for the fields its type requires
    #[error("Malformed datagram frame: {len} bytes, need at least {min}")]
    MalformedFrame { len: usize, min: usize },

    /// An inbound V2 datagram carries a type byte outside the known set
    #[error("Unknown datagram frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Datagram muxer cancelled")]
    Cancelled,

    #[error("Invalid muxer configuration: {0}")]
    InvalidConfig(String),
}

impl DatagramError {
    /// Whether the error only concerns a single inbound datagram.
    ///
    /// Decode errors are dropped by the receive loop; anything else ends it.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            DatagramError::MalformedFrame { .. } | DatagramError::UnknownFrameType(_)
        )
    }
}

/// Result type for muxer operations
pub type DatagramResult<T> = Result<T, DatagramError>;
