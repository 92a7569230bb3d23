//! Demux sinks
//!
//! The receive loop is the only producer into a sink; the application owning
//! the sink is its only consumer. Bounded `tokio::sync::mpsc` senders work as
//! sinks directly, and callback-style receivers can be wrapped in a
//! [`CallbackSink`].

use crate::frame::SessionDatagram;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sink delivery errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink is full")]
    Full,

    #[error("Sink is closed")]
    Closed,

    #[error("Receiver rejected datagram: {0}")]
    Rejected(String),
}

/// Destination for decoded session datagrams
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Deliver, waiting for capacity if the sink is full
    async fn deliver(&self, datagram: SessionDatagram) -> Result<(), SinkError>;

    /// Deliver without waiting; returns [`SinkError::Full`] if there is no room
    fn try_deliver(&self, datagram: SessionDatagram) -> Result<(), SinkError>;
}

/// Destination for decoded raw packet payloads (V2 only)
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Deliver, waiting for capacity if the sink is full
    async fn deliver(&self, payload: Bytes) -> Result<(), SinkError>;

    /// Deliver without waiting; returns [`SinkError::Full`] if there is no room
    fn try_deliver(&self, payload: Bytes) -> Result<(), SinkError>;
}

fn map_try_send<T>(err: mpsc::error::TrySendError<T>) -> SinkError {
    match err {
        mpsc::error::TrySendError::Full(_) => SinkError::Full,
        mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
    }
}

#[async_trait]
impl SessionSink for mpsc::Sender<SessionDatagram> {
    async fn deliver(&self, datagram: SessionDatagram) -> Result<(), SinkError> {
        self.send(datagram).await.map_err(|_| SinkError::Closed)
    }

    fn try_deliver(&self, datagram: SessionDatagram) -> Result<(), SinkError> {
        self.try_send(datagram).map_err(map_try_send)
    }
}

#[async_trait]
impl PacketSink for mpsc::Sender<Bytes> {
    async fn deliver(&self, payload: Bytes) -> Result<(), SinkError> {
        self.send(payload).await.map_err(|_| SinkError::Closed)
    }

    fn try_deliver(&self, payload: Bytes) -> Result<(), SinkError> {
        self.try_send(payload).map_err(map_try_send)
    }
}

/// Callback interface for session datagrams
pub trait SessionReceiver: Send + Sync {
    fn receive_datagram(&self, id: Uuid, payload: Bytes) -> Result<(), SinkError>;
}

/// Callback interface for raw packets
pub trait PacketReceiver: Send + Sync {
    fn receive_packet(&self, payload: Bytes) -> Result<(), SinkError>;
}

/// Adapts a callback receiver into a sink
///
/// Callbacks run inline on the receive loop, so they never report `Full`;
/// a slow callback stalls the loop the same way a full blocking sink does.
#[derive(Debug, Clone)]
pub struct CallbackSink<R> {
    receiver: R,
}

impl<R> CallbackSink<R> {
    pub fn new(receiver: R) -> Self {
        Self { receiver }
    }

    pub fn receiver(&self) -> &R {
        &self.receiver
    }
}

#[async_trait]
impl<R: SessionReceiver> SessionSink for CallbackSink<R> {
    async fn deliver(&self, datagram: SessionDatagram) -> Result<(), SinkError> {
        self.try_deliver(datagram)
    }

    fn try_deliver(&self, datagram: SessionDatagram) -> Result<(), SinkError> {
        self.receiver.receive_datagram(datagram.id, datagram.payload)
    }
}

#[async_trait]
impl<R: PacketReceiver> PacketSink for CallbackSink<R> {
    async fn deliver(&self, payload: Bytes) -> Result<(), SinkError> {
        self.try_deliver(payload)
    }

    fn try_deliver(&self, payload: Bytes) -> Result<(), SinkError> {
        self.receiver.receive_packet(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_channel_sink_full_and_closed() {
        let (tx, mut rx) = mpsc::channel::<SessionDatagram>(1);
        let id = Uuid::new_v4();

        tx.try_deliver(SessionDatagram::new(id, "first")).unwrap();
        assert_eq!(
            tx.try_deliver(SessionDatagram::new(id, "second")),
            Err(SinkError::Full)
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(&received.payload[..], b"first");

        drop(rx);
        assert_eq!(
            SessionSink::deliver(&tx, SessionDatagram::new(id, "third")).await,
            Err(SinkError::Closed)
        );
    }

    #[tokio::test]
    async fn test_packet_channel_sink() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);

        PacketSink::deliver(&tx, Bytes::from_static(b"packet"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"packet"));
    }

    #[derive(Default)]
    struct RecordingReceiver {
        sessions: Mutex<Vec<(Uuid, Bytes)>>,
        packets: Mutex<Vec<Bytes>>,
    }

    impl SessionReceiver for RecordingReceiver {
        fn receive_datagram(&self, id: Uuid, payload: Bytes) -> Result<(), SinkError> {
            if payload.is_empty() {
                return Err(SinkError::Rejected(format!("empty payload for {}", id)));
            }
            self.sessions.lock().unwrap().push((id, payload));
            Ok(())
        }
    }

    impl PacketReceiver for RecordingReceiver {
        fn receive_packet(&self, payload: Bytes) -> Result<(), SinkError> {
            self.packets.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_callback_sink() {
        let sink = CallbackSink::new(RecordingReceiver::default());
        let id = Uuid::new_v4();

        SessionSink::deliver(&sink, SessionDatagram::new(id, "payload"))
            .await
            .unwrap();
        PacketSink::deliver(&sink, Bytes::from_static(b"raw"))
            .await
            .unwrap();

        let rejected = SessionSink::try_deliver(&sink, SessionDatagram::new(id, Bytes::new()));
        assert!(matches!(rejected, Err(SinkError::Rejected(_))));

        let sessions = sink.receiver().sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].0, id);
        assert_eq!(sink.receiver().packets.lock().unwrap().len(), 1);
    }
}
