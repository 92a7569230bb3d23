//! V2 datagram muxer: sessions and raw packets

use crate::config::MuxerConfig;
use crate::error::DatagramResult;
use crate::frame::{DatagramVersion, FrameCodec, FrameCodecV2};
use crate::muxer::{BaseDatagramMuxer, MuxerCore};
use crate::sink::{PacketSink, SessionSink};
use crate::stats::MuxerStatsSnapshot;
use crate::transport::DatagramTransport;
use crate::TYPE_ID_LEN;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Muxer speaking the V2 wire format
///
/// Every frame starts with a type byte, so sessions and raw network packets
/// can share one connection. Not wire-compatible with [`DatagramMuxer`](crate::DatagramMuxer).
#[derive(Debug)]
pub struct DatagramMuxerV2<T> {
    pub(crate) core: MuxerCore<T>,
}

impl<T: DatagramTransport + 'static> DatagramMuxerV2<T> {
    pub fn new(transport: Arc<T>, config: MuxerConfig) -> DatagramResult<Self> {
        Ok(Self {
            core: MuxerCore::new(transport, config, DatagramVersion::V2)?,
        })
    }

    /// Deliver decoded session datagrams to `sink`
    pub fn with_session_sink(mut self, sink: impl SessionSink + 'static) -> Self {
        self.core.session_sink = Some(Box::new(sink));
        self
    }

    /// Deliver decoded raw packet payloads to `sink`
    pub fn with_packet_sink(mut self, sink: impl PacketSink + 'static) -> Self {
        self.core.packet_sink = Some(Box::new(sink));
        self
    }

    /// Send `payload` as a raw packet frame
    ///
    /// Same contract as [`mux_session`](BaseDatagramMuxer::mux_session):
    /// oversized frames are rejected locally and never reach the transport.
    pub async fn mux_packet(&self, payload: &[u8]) -> DatagramResult<()> {
        let frame = FrameCodecV2::encode_packet(payload, self.core.config.max_frame_size)?;
        self.core.send_packet_frame(frame).await
    }

    /// Largest payload accepted by [`mux_session`](BaseDatagramMuxer::mux_session)
    pub fn max_session_payload(&self) -> usize {
        DatagramVersion::V2.max_session_payload(self.core.config.max_frame_size)
    }

    /// Largest payload accepted by [`mux_packet`](Self::mux_packet)
    pub fn max_packet_payload(&self) -> usize {
        self.core.config.max_frame_size - TYPE_ID_LEN
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.core.transport
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.core.config
    }
}

#[async_trait]
impl<T: DatagramTransport + 'static> BaseDatagramMuxer for DatagramMuxerV2<T> {
    fn version(&self) -> DatagramVersion {
        FrameCodecV2::VERSION
    }

    async fn mux_session(&self, id: Uuid, payload: &[u8]) -> DatagramResult<()> {
        self.core.mux_session::<FrameCodecV2>(id, payload).await
    }

    async fn serve_receive(&self, shutdown: CancellationToken) -> DatagramResult<()> {
        self.core.serve::<FrameCodecV2>(shutdown).await
    }

    fn stats(&self) -> MuxerStatsSnapshot {
        self.core.stats.snapshot()
    }
}
