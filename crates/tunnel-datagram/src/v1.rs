//! V1 datagram muxer: sessions only

use crate::config::MuxerConfig;
use crate::error::DatagramResult;
use crate::frame::{DatagramVersion, FrameCodec, FrameCodecV1};
use crate::muxer::{BaseDatagramMuxer, MuxerCore};
use crate::sink::SessionSink;
use crate::stats::MuxerStatsSnapshot;
use crate::transport::DatagramTransport;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Muxer speaking the V1 wire format (`payload || session id`)
///
/// Without a session sink the muxer can still send; anything it receives is
/// counted and dropped.
#[derive(Debug)]
pub struct DatagramMuxer<T> {
    pub(crate) core: MuxerCore<T>,
}

impl<T: DatagramTransport + 'static> DatagramMuxer<T> {
    pub fn new(transport: Arc<T>, config: MuxerConfig) -> DatagramResult<Self> {
        Ok(Self {
            core: MuxerCore::new(transport, config, DatagramVersion::V1)?,
        })
    }

    /// Deliver decoded session datagrams to `sink`
    pub fn with_session_sink(mut self, sink: impl SessionSink + 'static) -> Self {
        self.core.session_sink = Some(Box::new(sink));
        self
    }

    /// Largest payload accepted by [`mux_session`](BaseDatagramMuxer::mux_session)
    pub fn max_session_payload(&self) -> usize {
        DatagramVersion::V1.max_session_payload(self.core.config.max_frame_size)
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.core.transport
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.core.config
    }
}

#[async_trait]
impl<T: DatagramTransport + 'static> BaseDatagramMuxer for DatagramMuxer<T> {
    fn version(&self) -> DatagramVersion {
        FrameCodecV1::VERSION
    }

    async fn mux_session(&self, id: Uuid, payload: &[u8]) -> DatagramResult<()> {
        self.core.mux_session::<FrameCodecV1>(id, payload).await
    }

    async fn serve_receive(&self, shutdown: CancellationToken) -> DatagramResult<()> {
        self.core.serve::<FrameCodecV1>(shutdown).await
    }

    fn stats(&self) -> MuxerStatsSnapshot {
        self.core.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatagramError;
    use crate::frame::SessionDatagram;
    use crate::tests::MockDatagramTransport;
    use crate::SESSION_ID_LEN;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_empty_payload_end_to_end() {
        let (client, edge) = MockDatagramTransport::pair();
        let (session_tx, mut session_rx) = mpsc::channel(16);

        let sender = DatagramMuxer::new(client.clone(), MuxerConfig::default()).unwrap();
        let receiver = Arc::new(
            DatagramMuxer::new(edge.clone(), MuxerConfig::default())
                .unwrap()
                .with_session_sink(session_tx),
        );

        let shutdown = CancellationToken::new();
        let serve = {
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { receiver.serve_receive(shutdown).await })
        };

        let id = Uuid::new_v4();
        sender.mux_session(id, &[]).await.unwrap();

        let sent = client.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), SESSION_ID_LEN);

        let received = timeout(Duration::from_secs(5), session_rx.recv())
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        assert_eq!(received, SessionDatagram::new(id, Bytes::new()));

        shutdown.cancel();
        let result = serve.await.unwrap();
        assert!(matches!(result, Err(DatagramError::Cancelled)));
        assert_eq!(receiver.stats().sessions_delivered, 1);
    }

    #[tokio::test]
    async fn test_oversize_is_never_sent() {
        let (client, _edge) = MockDatagramTransport::pair();
        let muxer = DatagramMuxer::new(client.clone(), MuxerConfig::default()).unwrap();
        let id = Uuid::new_v4();

        let max = vec![0u8; muxer.max_session_payload()];
        muxer.mux_session(id, &max).await.unwrap();

        let too_large = vec![0u8; muxer.max_session_payload() + 1];
        let result = muxer.mux_session(id, &too_large).await;
        assert!(matches!(result, Err(DatagramError::Oversize { .. })));

        let sent = client.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 1350);
        assert_eq!(muxer.stats().sessions_sent, 1);
    }

    #[tokio::test]
    async fn test_transport_send_error_propagates() {
        let (client, _edge) = MockDatagramTransport::pair();
        let muxer = DatagramMuxer::new(client.clone(), MuxerConfig::default()).unwrap();

        client.close();

        let result = muxer.mux_session(Uuid::new_v4(), b"after close").await;
        assert!(matches!(result, Err(DatagramError::Transport(_))));
        assert_eq!(muxer.stats().sessions_sent, 0);
    }

    #[tokio::test]
    async fn test_malformed_datagram_does_not_stop_loop() {
        let (client, edge) = MockDatagramTransport::pair();
        let (session_tx, mut session_rx) = mpsc::channel(16);

        let receiver = DatagramMuxer::new(edge, MuxerConfig::default())
            .unwrap()
            .with_session_sink(session_tx);
        let sender = DatagramMuxer::new(client.clone(), MuxerConfig::default()).unwrap();

        client.inject(Bytes::from_static(b"short")).await;

        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            sender
                .mux_session(*id, format!("payload-{}", i).as_bytes())
                .await
                .unwrap();
        }

        // Closing the sending side ends the loop once the queue drains
        client.close();
        let result = receiver.serve_receive(CancellationToken::new()).await;
        assert!(matches!(result, Err(DatagramError::Transport(_))));

        for (i, id) in ids.iter().enumerate() {
            let datagram = session_rx.recv().await.unwrap();
            assert_eq!(datagram.id, *id);
            assert_eq!(datagram.payload, Bytes::from(format!("payload-{}", i)));
        }
        assert!(session_rx.try_recv().is_err());

        let stats = receiver.stats();
        assert_eq!(stats.malformed_dropped, 1);
        assert_eq!(stats.sessions_delivered, 3);
    }

    #[tokio::test]
    async fn test_send_only_muxer_drops_inbound() {
        let (client, edge) = MockDatagramTransport::pair();
        let receiver = DatagramMuxer::new(edge, MuxerConfig::default()).unwrap();
        let sender = DatagramMuxer::new(client.clone(), MuxerConfig::default()).unwrap();

        sender.mux_session(Uuid::new_v4(), b"nobody listening").await.unwrap();
        client.close();

        let result = receiver.serve_receive(CancellationToken::new()).await;
        assert!(matches!(result, Err(DatagramError::Transport(_))));
        assert_eq!(receiver.stats().no_sink_dropped, 1);
    }

    #[tokio::test]
    async fn test_rejects_frame_size_below_overhead() {
        let (client, _edge) = MockDatagramTransport::pair();
        let result = DatagramMuxer::new(client, MuxerConfig::default().with_max_frame_size(10));
        assert!(matches!(result, Err(DatagramError::InvalidConfig(_))));
    }
}
