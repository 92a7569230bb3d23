//! Muxer capability set and the shared receive loop
//!
//! [`DatagramMuxer`](crate::DatagramMuxer) and
//! [`DatagramMuxerV2`](crate::DatagramMuxerV2) differ only in their frame
//! codec. Both wrap a [`MuxerCore`] which owns the transport handle, the sinks
//! and the receive loop; the loop is generic over the codec so that the
//! decode step is the only thing that changes between versions.

use crate::config::{FullSinkPolicy, MuxerConfig};
use crate::error::{DatagramError, DatagramResult};
use crate::frame::{Datagram, DatagramVersion, FrameCodec};
use crate::sink::{PacketSink, SessionSink, SinkError};
use crate::stats::{MuxerStats, MuxerStatsSnapshot};
use crate::transport::DatagramTransport;
use crate::v1::DatagramMuxer;
use crate::v2::DatagramMuxerV2;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// Operations shared by every muxer version
#[async_trait]
pub trait BaseDatagramMuxer: Send + Sync {
    /// Protocol version spoken by this muxer
    fn version(&self) -> DatagramVersion;

    /// Frame `payload` for session `id` and send it as one datagram
    ///
    /// Oversized frames fail with [`DatagramError::Oversize`] before anything
    /// reaches the transport. Transport failures are returned as-is; nothing
    /// is ever retried.
    async fn mux_session(&self, id: Uuid, payload: &[u8]) -> DatagramResult<()>;

    /// Receive, decode and dispatch datagrams until `shutdown` fires or the
    /// transport fails
    ///
    /// Undecodable datagrams are dropped and the loop keeps going. The return
    /// value is always an error: [`DatagramError::Cancelled`] after shutdown,
    /// [`DatagramError::Transport`] when the connection goes away.
    async fn serve_receive(&self, shutdown: CancellationToken) -> DatagramResult<()>;

    /// Current counters
    fn stats(&self) -> MuxerStatsSnapshot;
}

/// Build a muxer for a version chosen at runtime
///
/// A packet sink is only meaningful for V2; passing one to a V1 muxer is a
/// configuration error.
pub fn new_datagram_muxer<T: DatagramTransport + 'static>(
    version: DatagramVersion,
    transport: Arc<T>,
    config: MuxerConfig,
    session_sink: Option<Box<dyn SessionSink>>,
    packet_sink: Option<Box<dyn PacketSink>>,
) -> DatagramResult<Box<dyn BaseDatagramMuxer>> {
    match version {
        DatagramVersion::V1 => {
            if packet_sink.is_some() {
                return Err(DatagramError::InvalidConfig(
                    "v1 datagram muxer cannot deliver raw packets".to_string(),
                ));
            }
            let mut muxer = DatagramMuxer::new(transport, config)?;
            muxer.core.session_sink = session_sink;
            Ok(Box::new(muxer))
        }
        DatagramVersion::V2 => {
            let mut muxer = DatagramMuxerV2::new(transport, config)?;
            muxer.core.session_sink = session_sink;
            muxer.core.packet_sink = packet_sink;
            Ok(Box::new(muxer))
        }
    }
}

/// State shared by all muxer versions
pub(crate) struct MuxerCore<T> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: MuxerConfig,
    pub(crate) stats: MuxerStats,
    pub(crate) session_sink: Option<Box<dyn SessionSink>>,
    pub(crate) packet_sink: Option<Box<dyn PacketSink>>,
}

impl<T: fmt::Debug> fmt::Debug for MuxerCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxerCore")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .field("session_sink", &self.session_sink.is_some())
            .field("packet_sink", &self.packet_sink.is_some())
            .finish()
    }
}

impl<T: DatagramTransport> MuxerCore<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        config: MuxerConfig,
        version: DatagramVersion,
    ) -> DatagramResult<Self> {
        config.validate(version)?;

        if let Some(path_max) = transport.max_datagram_size() {
            if path_max < config.max_frame_size {
                warn!(
                    "Transport {} carries datagrams up to {} bytes, below the {} byte frame size",
                    transport.connection_id(),
                    path_max,
                    config.max_frame_size
                );
            }
        }

        Ok(Self {
            transport,
            config,
            stats: MuxerStats::default(),
            session_sink: None,
            packet_sink: None,
        })
    }

    pub(crate) async fn mux_session<C: FrameCodec>(
        &self,
        id: Uuid,
        payload: &[u8],
    ) -> DatagramResult<()> {
        let frame = C::encode_session(id, payload, self.config.max_frame_size)?;
        let len = frame.len();

        self.transport.send_datagram(frame).await?;
        self.stats.record_session_sent();

        trace!("Muxed {} byte datagram for session {}", len, id);
        Ok(())
    }

    pub(crate) async fn send_packet_frame(&self, frame: Bytes) -> DatagramResult<()> {
        let len = frame.len();

        self.transport.send_datagram(frame).await?;
        self.stats.record_packet_sent();

        trace!("Muxed {} byte packet datagram", len);
        Ok(())
    }

    pub(crate) async fn serve<C: FrameCodec>(&self, shutdown: CancellationToken) -> DatagramResult<()> {
        let span = info_span!(
            "datagram_muxer",
            version = %C::VERSION,
            label = %self.config.label
        );

        self.receive_loop::<C>(&shutdown).instrument(span).await
    }

    async fn receive_loop<C: FrameCodec>(&self, shutdown: &CancellationToken) -> DatagramResult<()> {
        debug!("Serving datagrams on {}", self.transport.connection_id());

        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Datagram muxer cancelled");
                    return Err(DatagramError::Cancelled);
                }
                result = self.transport.receive_datagram() => match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("Datagram receive failed: {}", e);
                        return Err(e.into());
                    }
                },
            };

            let len = frame.len();
            let datagram = match C::decode(frame) {
                Ok(datagram) => datagram,
                Err(e) => {
                    self.stats.record_malformed();
                    debug!("Dropping {} byte datagram: {}", len, e);
                    continue;
                }
            };

            self.dispatch(datagram, shutdown).await?;
        }
    }

    async fn dispatch(&self, datagram: Datagram, shutdown: &CancellationToken) -> DatagramResult<()> {
        match datagram {
            Datagram::Session(session) => {
                let Some(sink) = &self.session_sink else {
                    self.stats.record_no_sink();
                    trace!("No session sink, dropping datagram for {}", session.id);
                    return Ok(());
                };

                let id = session.id;
                let result = match self.config.full_sink_policy {
                    FullSinkPolicy::Block => tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Err(DatagramError::Cancelled),
                        result = sink.deliver(session) => result,
                    },
                    FullSinkPolicy::Drop => sink.try_deliver(session),
                };

                match result {
                    Ok(()) => self.stats.record_session_delivered(),
                    Err(e) => self.record_sink_error(&format!("session {}", id), e),
                }
            }
            Datagram::Packet(packet) => {
                let Some(sink) = &self.packet_sink else {
                    self.stats.record_no_sink();
                    trace!("No packet sink, dropping {} byte packet", packet.payload.len());
                    return Ok(());
                };

                let result = match self.config.full_sink_policy {
                    FullSinkPolicy::Block => tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Err(DatagramError::Cancelled),
                        result = sink.deliver(packet.payload) => result,
                    },
                    FullSinkPolicy::Drop => sink.try_deliver(packet.payload),
                };

                match result {
                    Ok(()) => self.stats.record_packet_delivered(),
                    Err(e) => self.record_sink_error("raw packet", e),
                }
            }
        }

        Ok(())
    }

    fn record_sink_error(&self, what: &str, err: SinkError) {
        match err {
            SinkError::Full => {
                self.stats.record_sink_full();
                debug!("Sink full, dropped datagram for {}", what);
            }
            SinkError::Closed => {
                self.stats.record_no_sink();
                debug!("Sink closed, dropped datagram for {}", what);
            }
            SinkError::Rejected(reason) => {
                warn!("Receiver rejected datagram for {}: {}", what, reason);
            }
        }
    }
}
