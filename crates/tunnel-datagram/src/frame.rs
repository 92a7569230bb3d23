//! Datagram types and the V1/V2 frame codecs

use crate::error::{DatagramError, DatagramResult};
use crate::session_id::{append_session_id, read_session_id, strip_session_id};
use crate::{SESSION_ID_LEN, TYPE_ID_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use uuid::Uuid;

/// A payload addressed to one tunnel session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDatagram {
    pub id: Uuid,
    pub payload: Bytes,
}

impl SessionDatagram {
    pub fn new(id: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// A raw network-layer packet with no session addressing (V2 only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub payload: Bytes,
}

impl RawPacket {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// A decoded inbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Session(SessionDatagram),
    Packet(RawPacket),
}

/// Datagram protocol version, fixed for the lifetime of a muxer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatagramVersion {
    /// Sessions only: `payload || session id`
    V1 = 1,
    /// Sessions and raw packets behind a one-byte type tag
    V2 = 2,
}

impl DatagramVersion {
    /// Fixed bytes a session frame adds on top of its payload
    pub fn session_overhead(&self) -> usize {
        match self {
            DatagramVersion::V1 => SESSION_ID_LEN,
            DatagramVersion::V2 => TYPE_ID_LEN + SESSION_ID_LEN,
        }
    }

    /// Largest session payload that fits in `max_frame_size`
    pub fn max_session_payload(&self, max_frame_size: usize) -> usize {
        max_frame_size.saturating_sub(self.session_overhead())
    }
}

impl TryFrom<u8> for DatagramVersion {
    type Error = DatagramError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DatagramVersion::V1),
            2 => Ok(DatagramVersion::V2),
            _ => Err(DatagramError::InvalidConfig(format!(
                "unknown datagram version {}",
                value
            ))),
        }
    }
}

impl fmt::Display for DatagramVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramVersion::V1 => write!(f, "v1"),
            DatagramVersion::V2 => write!(f, "v2"),
        }
    }
}

/// Type discriminator carried in the first byte of a V2 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatagramV2Type {
    Session = 0,
    Packet = 1,
}

impl TryFrom<u8> for DatagramV2Type {
    type Error = DatagramError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DatagramV2Type::Session),
            1 => Ok(DatagramV2Type::Packet),
            _ => Err(DatagramError::UnknownFrameType(value)),
        }
    }
}

/// Encoding and decoding of one protocol version's frames
pub trait FrameCodec: Send + Sync + 'static {
    const VERSION: DatagramVersion;

    /// Frame a session payload
    fn encode_session(id: Uuid, payload: &[u8], max_frame_size: usize) -> DatagramResult<Bytes>;

    /// Parse an inbound frame
    fn decode(frame: Bytes) -> DatagramResult<Datagram>;
}

/// V1 codec: `payload || session id`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodecV1;

impl FrameCodec for FrameCodecV1 {
    const VERSION: DatagramVersion = DatagramVersion::V1;

    fn encode_session(id: Uuid, payload: &[u8], max_frame_size: usize) -> DatagramResult<Bytes> {
        append_session_id(id, payload, max_frame_size)
    }

    fn decode(frame: Bytes) -> DatagramResult<Datagram> {
        let (id, payload) = strip_session_id(frame)?;
        Ok(Datagram::Session(SessionDatagram { id, payload }))
    }
}

/// V2 codec: `type || session id || payload` or `type || payload`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodecV2;

impl FrameCodecV2 {
    /// Frame a raw packet
    pub fn encode_packet(payload: &[u8], max_frame_size: usize) -> DatagramResult<Bytes> {
        let size = TYPE_ID_LEN + payload.len();
        if size > max_frame_size {
            return Err(DatagramError::Oversize {
                size,
                max: max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(DatagramV2Type::Packet as u8);
        buf.put_slice(payload);

        Ok(buf.freeze())
    }
}

impl FrameCodec for FrameCodecV2 {
    const VERSION: DatagramVersion = DatagramVersion::V2;

    fn encode_session(id: Uuid, payload: &[u8], max_frame_size: usize) -> DatagramResult<Bytes> {
        let size = TYPE_ID_LEN + SESSION_ID_LEN + payload.len();
        if size > max_frame_size {
            return Err(DatagramError::Oversize {
                size,
                max: max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(DatagramV2Type::Session as u8);
        buf.put_slice(id.as_bytes());
        buf.put_slice(payload);

        Ok(buf.freeze())
    }

    fn decode(mut frame: Bytes) -> DatagramResult<Datagram> {
        let Some(&type_byte) = frame.first() else {
            return Err(DatagramError::MalformedFrame {
                len: 0,
                min: TYPE_ID_LEN,
            });
        };

        match DatagramV2Type::try_from(type_byte)? {
            DatagramV2Type::Session => {
                if frame.len() < TYPE_ID_LEN + SESSION_ID_LEN {
                    return Err(DatagramError::MalformedFrame {
                        len: frame.len(),
                        min: TYPE_ID_LEN + SESSION_ID_LEN,
                    });
                }
                let id = read_session_id(&frame[TYPE_ID_LEN..])?;
                let payload = frame.split_off(TYPE_ID_LEN + SESSION_ID_LEN);
                Ok(Datagram::Session(SessionDatagram { id, payload }))
            }
            DatagramV2Type::Packet => {
                let payload = frame.split_off(TYPE_ID_LEN);
                Ok(Datagram::Packet(RawPacket { payload }))
            }
        }
    }
}
