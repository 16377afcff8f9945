//! Length-prefixed frame codec with optional in-place encryption.
//!
//! # Wire format
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────────────┐
//! │ len: u32 LE  │ type: u16 LE │ payload (len bytes)         │
//! └──────────────┴──────────────┴─────────────────────────────┘
//!        plaintext header         encrypted once secured
//! ```
//!
//! Before the handshake completes the codec passes payloads through
//! untouched. Once [`FrameCodec::install`] is called every payload is run
//! through the session cipher for its direction. Headers stay in the clear
//! so the receiver can delimit frames before decrypting.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::TransportError;
use crate::session::{Role, SessionCipher, SessionKeys};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 6;

/// Upper bound on a single payload (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(msg_type: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Transaction id carried in the first four payload bytes, if any.
    pub fn transaction_id(&self) -> Option<u32> {
        let head: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }
}

/// Codec for [`Frame`]s, plaintext until keys are installed.
#[derive(Debug, Default)]
pub struct FrameCodec {
    send: Option<SessionCipher>,
    recv: Option<SessionCipher>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches the codec to encrypted mode.
    ///
    /// Frames already buffered but not yet decoded are decrypted with the
    /// new keys, which is what the handshake needs: the server may pipeline
    /// its first secured frame right behind its hello.
    pub fn install(&mut self, keys: &SessionKeys, role: Role) {
        let (send, recv) = keys.ciphers(role);
        self.send = Some(send);
        self.recv = Some(recv);
    }

    pub fn is_secured(&self) -> bool {
        self.send.is_some()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let msg_type = u16::from_le_bytes([src[4], src[5]]);
        src.advance(HEADER_LEN);
        let mut payload = src.split_to(len);

        if let Some(cipher) = self.recv.as_mut() {
            cipher.apply(&mut payload)?;
        }

        Ok(Some(Frame {
            msg_type,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        let len = frame.payload.len();
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "refusing to send {len}-byte frame (limit {MAX_FRAME_LEN})"
            )));
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u32_le(len as u32);
        dst.put_u16_le(frame.msg_type);

        let start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(cipher) = self.send.as_mut() {
            cipher.apply(&mut dst[start..])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secured_pair() -> (FrameCodec, FrameCodec) {
        let keys = SessionKeys::derive(&[3u8; 64], &[4u8; 32]);
        let mut client = FrameCodec::new();
        let mut server = FrameCodec::new();
        client.install(&keys, Role::Client);
        server.install(&keys, Role::Server);
        (client, server)
    }

    #[test]
    fn test_plaintext_layout() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(0x0010, &b"abc"[..]), &mut buf)
            .unwrap();

        assert_eq!(&buf[..], &[3, 0, 0, 0, 0x10, 0x00, b'a', b'b', b'c']);
    }

    #[test]
    fn test_partial_input_waits() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[5u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0, 0x01, 0x00, b'h', b'e']);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"llo");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, 1);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le((MAX_FRAME_LEN + 1) as u32);
        buf.put_u16_le(1);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn test_secured_payload_is_encrypted_header_is_not() {
        let (mut client, mut server) = secured_pair();
        assert!(client.is_secured());

        let mut buf = BytesMut::new();
        let payload = b"0123456789abcdef".to_vec();
        client
            .encode(Frame::new(0x0020, payload.clone()), &mut buf)
            .unwrap();

        assert_eq!(&buf[..HEADER_LEN], &[16, 0, 0, 0, 0x20, 0x00]);
        assert_ne!(&buf[HEADER_LEN..], &payload[..]);

        let frame = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, 0x0020);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn test_transaction_id() {
        let frame = Frame::new(0x0021, vec![0x2a, 0, 0, 0, 9]);
        assert_eq!(frame.transaction_id(), Some(42));
        assert_eq!(Frame::new(0x0021, vec![1, 2]).transaction_id(), None);
    }

    proptest! {
        /// Frames survive arbitrary TCP segmentation with encryption on.
        #[test]
        fn prop_decode_is_split_invariant(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..300), 1..6),
            cut in 1usize..64,
        ) {
            let (mut client, mut server) = secured_pair();
            let mut wire = BytesMut::new();
            for (i, p) in payloads.iter().enumerate() {
                client.encode(Frame::new(i as u16, p.clone()), &mut wire).unwrap();
            }

            let mut inbox = BytesMut::new();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(cut) {
                inbox.extend_from_slice(chunk);
                while let Some(frame) = server.decode(&mut inbox).unwrap() {
                    decoded.push(frame);
                }
            }

            prop_assert_eq!(decoded.len(), payloads.len());
            for (i, (frame, p)) in decoded.iter().zip(&payloads).enumerate() {
                prop_assert_eq!(frame.msg_type, i as u16);
                prop_assert_eq!(&frame.payload[..], &p[..]);
            }
        }
    }
}
