//! QUIC connection as a datagram transport

use async_trait::async_trait;
use bytes::Bytes;
use quinn::{Connection, ConnectionError, SendDatagramError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use tunnel_datagram::{DatagramTransport, TransportError, TransportResult};

const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Datagram counters and path metrics for one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatagramConnectionStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub lost_packets: u64,
    /// Smoothed RTT estimate, saturating at `u32::MAX`
    pub rtt_ms: u32,
    pub uptime_secs: u64,
    pub max_datagram_size: Option<usize>,
}

/// QUIC connection wrapper exposing the unreliable-datagram extension
#[derive(Debug, Clone)]
pub struct QuicDatagramConnection {
    inner: Connection,
    connection_id: String,
    created_at: Instant,
    send_buffer_capacity: usize,
}

impl QuicDatagramConnection {
    pub fn new(connection: Connection) -> Self {
        let connection_id = format!("quic-{}", connection.stable_id());
        // Nothing is queued yet, so the free space is the whole buffer
        let send_buffer_capacity = connection.datagram_send_buffer_space();

        Self {
            inner: connection,
            connection_id,
            created_at: Instant::now(),
            send_buffer_capacity,
        }
    }

    /// Get the underlying quinn connection
    pub fn inner(&self) -> &Connection {
        &self.inner
    }

    /// Wait until every queued outbound datagram has been put on the wire
    ///
    /// quinn discards datagrams still queued when the connection closes, so a
    /// sender should flush before [`close`](Self::close). Returns `false` if
    /// `timeout` elapses or the connection closes first.
    pub async fn flush_datagrams(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.inner.datagram_send_buffer_space() >= self.send_buffer_capacity {
                return true;
            }
            if self.is_closed() || tokio::time::Instant::now() >= deadline {
                debug!(
                    "{} gave up flushing with {} bytes queued",
                    self.connection_id,
                    self.send_buffer_capacity
                        .saturating_sub(self.inner.datagram_send_buffer_space())
                );
                return false;
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    pub fn close(&self, error_code: u32, reason: &str) {
        self.inner
            .close(quinn::VarInt::from_u32(error_code), reason.as_bytes());

        debug!(
            "QUIC connection {} closed: {} (code: {})",
            self.connection_id, reason, error_code
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    pub fn stats(&self) -> DatagramConnectionStats {
        let quinn_stats = self.inner.stats();

        DatagramConnectionStats {
            datagrams_sent: quinn_stats.frame_tx.datagram,
            datagrams_received: quinn_stats.frame_rx.datagram,
            lost_packets: quinn_stats.path.lost_packets,
            rtt_ms: rtt_millis(quinn_stats.path.rtt),
            uptime_secs: self.created_at.elapsed().as_secs(),
            max_datagram_size: self.inner.max_datagram_size(),
        }
    }

    fn map_send_error(&self, size: usize, err: SendDatagramError) -> TransportError {
        match err {
            SendDatagramError::UnsupportedByPeer => {
                TransportError::DatagramsUnsupported("peer does not accept datagrams".to_string())
            }
            SendDatagramError::Disabled => {
                TransportError::DatagramsUnsupported("datagrams disabled locally".to_string())
            }
            SendDatagramError::TooLarge => TransportError::DatagramTooLarge {
                size,
                max: self.inner.max_datagram_size().unwrap_or(0),
            },
            SendDatagramError::ConnectionLost(e) => map_connection_error(e),
            #[allow(unreachable_patterns)]
            e => TransportError::ConnectionError(e.to_string()),
        }
    }
}

fn rtt_millis(rtt: Duration) -> u32 {
    u32::try_from(rtt.as_millis()).unwrap_or(u32::MAX)
}

pub(crate) fn map_connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::TimedOut => TransportError::Timeout,
        ConnectionError::ApplicationClosed(_)
        | ConnectionError::ConnectionClosed(_)
        | ConnectionError::LocallyClosed
        | ConnectionError::Reset => TransportError::ConnectionClosed(err.to_string()),
        e => TransportError::ConnectionError(e.to_string()),
    }
}

#[async_trait]
impl DatagramTransport for QuicDatagramConnection {
    async fn send_datagram(&self, datagram: Bytes) -> TransportResult<()> {
        let size = datagram.len();

        self.inner
            .send_datagram(datagram)
            .map_err(|e| self.map_send_error(size, e))?;

        trace!("{} sent datagram of {} bytes", self.connection_id, size);
        Ok(())
    }

    async fn receive_datagram(&self) -> TransportResult<Bytes> {
        let datagram = self
            .inner
            .read_datagram()
            .await
            .map_err(map_connection_error)?;

        trace!(
            "{} received datagram of {} bytes",
            self.connection_id,
            datagram.len()
        );
        Ok(datagram)
    }

    fn max_datagram_size(&self) -> Option<usize> {
        self.inner.max_datagram_size()
    }

    fn connection_id(&self) -> String {
        self.connection_id.clone()
    }
}
