//! In-memory transport for muxer tests

use super::*;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

static NEXT_MOCK_ID: AtomicU64 = AtomicU64::new(1);

/// One end of an in-memory datagram link
///
/// Datagrams sent on one end arrive, in order, on the other. Closing an end
/// fails its later sends and ends the peer's receive once the queue drains.
#[derive(Debug)]
pub struct MockDatagramTransport {
    id: u64,
    max_datagram_size: usize,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    sent: Mutex<Vec<Bytes>>,
}

impl MockDatagramTransport {
    /// Two connected ends carrying up to [`MAX_DATAGRAM_FRAME_SIZE`] bytes
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_max(MAX_DATAGRAM_FRAME_SIZE)
    }

    pub fn pair_with_max(max_datagram_size: usize) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self::new(max_datagram_size, b_tx, a_rx);
        let b = Self::new(max_datagram_size, a_tx, b_rx);

        (Arc::new(a), Arc::new(b))
    }

    fn new(
        max_datagram_size: usize,
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            id: NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed),
            max_datagram_size,
            outbound: std::sync::Mutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Put raw bytes on the wire towards the peer, bypassing every check
    pub async fn inject(&self, datagram: Bytes) {
        if let Some(tx) = self.outbound.lock().unwrap().as_ref() {
            let _ = tx.send(datagram);
        }
    }

    /// Datagrams successfully sent from this end
    pub async fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().await.clone()
    }

    /// Close this end
    pub fn close(&self) {
        self.outbound.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.lock().unwrap().is_none()
    }
}

#[async_trait]
impl DatagramTransport for MockDatagramTransport {
    async fn send_datagram(&self, datagram: Bytes) -> TransportResult<()> {
        if datagram.len() > self.max_datagram_size {
            return Err(TransportError::DatagramTooLarge {
                size: datagram.len(),
                max: self.max_datagram_size,
            });
        }

        let tx = self
            .outbound
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".to_string()))?;

        tx.send(datagram.clone())
            .map_err(|_| TransportError::ConnectionClosed("peer gone".to_string()))?;
        self.sent.lock().await.push(datagram);

        Ok(())
    }

    async fn receive_datagram(&self) -> TransportResult<Bytes> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::ConnectionClosed("closed by peer".to_string()))
    }

    fn max_datagram_size(&self) -> Option<usize> {
        Some(self.max_datagram_size)
    }

    fn connection_id(&self) -> String {
        format!("mock-{}", self.id)
    }
}

#[cfg(test)]
mod test_mock {
    use super::*;

    #[tokio::test]
    async fn test_mock_pair_delivers_in_order() {
        let (a, b) = MockDatagramTransport::pair();

        a.send_datagram(Bytes::from_static(b"one")).await.unwrap();
        a.send_datagram(Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(b.receive_datagram().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(b.receive_datagram().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(a.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_close() {
        let (a, b) = MockDatagramTransport::pair();

        a.send_datagram(Bytes::from_static(b"queued")).await.unwrap();
        a.close();
        assert!(a.is_closed());

        assert!(a.send_datagram(Bytes::from_static(b"late")).await.is_err());
        assert_eq!(b.receive_datagram().await.unwrap(), Bytes::from_static(b"queued"));
        assert!(matches!(
            b.receive_datagram().await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_enforces_max_size() {
        let (a, _b) = MockDatagramTransport::pair_with_max(8);

        let result = a.send_datagram(Bytes::from_static(b"123456789")).await;
        assert!(matches!(
            result,
            Err(TransportError::DatagramTooLarge { size: 9, max: 8 })
        ));
    }

    #[tokio::test]
    async fn test_mock_connection_ids_differ() {
        let (a, b) = MockDatagramTransport::pair();
        assert_ne!(a.connection_id(), b.connection_id());
        assert!(a.connection_id().starts_with("mock-"));
    }
}
