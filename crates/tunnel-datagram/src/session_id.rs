//! Session identifier suffix codec
//!
//! The identifier is located purely by position: the last [`SESSION_ID_LEN`]
//! bytes of a frame. Nothing about the identifier bytes is validated.

use crate::error::{DatagramError, DatagramResult};
use crate::SESSION_ID_LEN;
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Append `id` after `payload`, producing `payload || id`
///
/// Fails with [`DatagramError::Oversize`] before allocating if the result would
/// exceed `max_frame_size`.
pub fn append_session_id(id: Uuid, payload: &[u8], max_frame_size: usize) -> DatagramResult<Bytes> {
    let size = payload.len() + SESSION_ID_LEN;
    if size > max_frame_size {
        return Err(DatagramError::Oversize {
            size,
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::with_capacity(size);
    buf.put_slice(payload);
    buf.put_slice(id.as_bytes());

    Ok(buf.freeze())
}

/// Split `payload || id` into the identifier and the payload
///
/// The payload is a zero-copy slice of `frame` and may be empty.
pub fn strip_session_id(mut frame: Bytes) -> DatagramResult<(Uuid, Bytes)> {
    if frame.len() < SESSION_ID_LEN {
        return Err(DatagramError::MalformedFrame {
            len: frame.len(),
            min: SESSION_ID_LEN,
        });
    }

    let id_bytes = frame.split_off(frame.len() - SESSION_ID_LEN);
    let id = read_session_id(&id_bytes)?;

    Ok((id, frame))
}

/// Read an identifier from the first [`SESSION_ID_LEN`] bytes of `buf`
pub(crate) fn read_session_id(buf: &[u8]) -> DatagramResult<Uuid> {
    let id = buf
        .get(..SESSION_ID_LEN)
        .and_then(|bytes| Uuid::from_slice(bytes).ok())
        .ok_or(DatagramError::MalformedFrame {
            len: buf.len(),
            min: SESSION_ID_LEN,
        })?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_DATAGRAM_FRAME_SIZE;

    #[test]
    fn test_suffix_then_remove_session_id() {
        let id = Uuid::new_v4();
        let msg = b"test_suffix_then_remove_session_id";

        let framed = append_session_id(id, msg, MAX_DATAGRAM_FRAME_SIZE).unwrap();
        assert_eq!(framed.len(), msg.len() + SESSION_ID_LEN);
        assert_eq!(&framed[msg.len()..], id.as_bytes());

        let (decoded_id, payload) = strip_session_id(framed).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(&payload[..], &msg[..]);
    }

    #[test]
    fn test_remove_session_id_too_short() {
        let result = strip_session_id(Bytes::from_static(b"test"));
        assert!(matches!(
            result,
            Err(DatagramError::MalformedFrame { len: 4, min: 16 })
        ));

        assert!(strip_session_id(Bytes::new()).is_err());
    }

    #[test]
    fn test_exact_id_length_gives_empty_payload() {
        let id = Uuid::new_v4();
        let (decoded_id, payload) = strip_session_id(Bytes::copy_from_slice(id.as_bytes())).unwrap();

        assert_eq!(decoded_id, id);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_suffix_session_id_size_boundary() {
        let id = Uuid::new_v4();

        let msg = vec![0u8; MAX_DATAGRAM_FRAME_SIZE - SESSION_ID_LEN];
        let framed = append_session_id(id, &msg, MAX_DATAGRAM_FRAME_SIZE).unwrap();
        assert_eq!(framed.len(), MAX_DATAGRAM_FRAME_SIZE);

        let msg = vec![0u8; MAX_DATAGRAM_FRAME_SIZE - SESSION_ID_LEN + 1];
        let result = append_session_id(id, &msg, MAX_DATAGRAM_FRAME_SIZE);
        assert!(matches!(
            result,
            Err(DatagramError::Oversize {
                size: 1351,
                max: 1350
            })
        ));
    }

    #[test]
    fn test_identifier_bytes_are_not_validated() {
        // Any 16 bytes decode; all-ones is as valid as a v4 UUID
        let mut frame = b"payload".to_vec();
        frame.extend_from_slice(&[0xff; SESSION_ID_LEN]);

        let (id, payload) = strip_session_id(Bytes::from(frame)).unwrap();
        assert_eq!(id, Uuid::from_bytes([0xff; SESSION_ID_LEN]));
        assert_eq!(&payload[..], b"payload");
    }
}
