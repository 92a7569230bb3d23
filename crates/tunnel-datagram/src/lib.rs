//! Datagram multiplexing for tunnel connections
//!
//! A single QUIC connection carries traffic for many independent tunnel
//! sessions over the unreliable-datagram extension. This crate frames each
//! datagram with the session it belongs to, rejects frames that would not fit
//! the negotiated datagram size, and demultiplexes inbound datagrams back to
//! consumer-owned sinks.
//!
//! # Wire format
//!
//! ```text
//! V1 (sessions only):
//! ┌──────────────────────────┬────────────────────────┐
//! │ payload (n bytes)        │ session id (16 bytes)  │
//! └──────────────────────────┴────────────────────────┘
//!
//! V2 (sessions and raw packets):
//! ┌──────────┬────────────────────────┬───────────────┐
//! │ type (1) │ session id (16 bytes)  │ payload       │   type = Session
//! └──────────┴────────────────────────┴───────────────┘
//! ┌──────────┬────────────────────────────────────────┐
//! │ type (1) │ payload                                │   type = Packet
//! └──────────┴────────────────────────────────────────┘
//! ```
//!
//! Every frame is at most [`MAX_DATAGRAM_FRAME_SIZE`] bytes unless the muxer
//! is configured with a different ceiling.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use tunnel_datagram::{BaseDatagramMuxer, DatagramMuxerV2, DatagramTransport, MuxerConfig};
//!
//! # async fn example<T: DatagramTransport + 'static>(transport: Arc<T>) -> Result<(), Box<dyn std::error::Error>> {
//! let (session_tx, mut session_rx) = mpsc::channel(16);
//! let (packet_tx, _packet_rx) = mpsc::channel(16);
//!
//! let muxer = Arc::new(
//!     DatagramMuxerV2::new(transport, MuxerConfig::default())?
//!         .with_session_sink(session_tx)
//!         .with_packet_sink(packet_tx),
//! );
//!
//! let shutdown = CancellationToken::new();
//! let serve = {
//!     let muxer = muxer.clone();
//!     let shutdown = shutdown.clone();
//!     tokio::spawn(async move { muxer.serve_receive(shutdown).await })
//! };
//!
//! muxer.mux_session(uuid::Uuid::new_v4(), b"hello").await?;
//! if let Some(datagram) = session_rx.recv().await {
//!     println!("session {} sent {} bytes", datagram.id, datagram.payload.len());
//! }
//!
//! shutdown.cancel();
//! let _ = serve.await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod muxer;
pub mod session_id;
pub mod sink;
pub mod stats;
pub mod transport;
pub mod v1;
pub mod v2;

pub use config::{FullSinkPolicy, MuxerConfig};
pub use error::{DatagramError, DatagramResult};
pub use frame::{
    Datagram, DatagramV2Type, DatagramVersion, FrameCodec, FrameCodecV1, FrameCodecV2, RawPacket,
    SessionDatagram,
};
pub use muxer::{new_datagram_muxer, BaseDatagramMuxer};
pub use sink::{
    CallbackSink, PacketReceiver, PacketSink, SessionReceiver, SessionSink, SinkError,
};
pub use stats::{MuxerStats, MuxerStatsSnapshot};
pub use transport::{DatagramTransport, TransportError, TransportResult};
pub use v1::DatagramMuxer;
pub use v2::DatagramMuxerV2;

/// Maximum wire size of a single datagram frame (bytes)
///
/// Both peers must agree on this value; a mismatch only shows up as
/// malformed frames on the receiving side.
pub const MAX_DATAGRAM_FRAME_SIZE: usize = 1350;

/// Wire length of a session identifier (a UUID)
pub const SESSION_ID_LEN: usize = 16;

/// Wire length of the V2 type discriminator
pub const TYPE_ID_LEN: usize = 1;

/// Largest V1 session payload under the default frame size
pub const MAX_DATAGRAM_PAYLOAD_SIZE: usize = MAX_DATAGRAM_FRAME_SIZE - SESSION_ID_LEN;

// Mock transport shared by the unit tests
#[cfg(test)]
pub mod tests;
