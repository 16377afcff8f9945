//! Message bodies and their encodings.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire::{put_string, WireError, WireReader};
use super::MessageType;
use crate::session::{KEY_BYTES, NONCE_LEN};
use crate::transport::Frame;

/// A message with a fixed type code and a body encoding.
pub trait Message: Sized {
    const TYPE: MessageType;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError>;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError>;

    fn to_frame(&self) -> Result<Frame, WireError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(Self::TYPE.code(), buf.freeze()))
    }

    /// Decodes a frame, rejecting the wrong type and trailing bytes.
    fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        if frame.msg_type != Self::TYPE.code() {
            return Err(WireError::UnexpectedType {
                expected: Self::TYPE.code(),
                actual: frame.msg_type,
            });
        }
        let mut reader = WireReader::new(&frame.payload);
        let message = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Opens the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub build_id: u32,
}

impl Message for ClientHello {
    const TYPE: MessageType = MessageType::ClientHello;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.build_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            protocol_version: reader.u32()?,
            build_id: reader.u32()?,
        })
    }
}

/// The server's half of the key agreement.
///
/// `public_value` is `B = g^b mod N`, big-endian and padded to the modulus
/// width. It is the only multi-byte field on the wire that is not
/// little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub public_value: [u8; KEY_BYTES],
    pub nonce: [u8; NONCE_LEN],
}

impl Message for ServerHello {
    const TYPE: MessageType = MessageType::ServerHello;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_slice(&self.public_value);
        buf.put_slice(&self.nonce);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            public_value: reader.array()?,
            nonce: reader.array()?,
        })
    }
}

/// Sent instead of [`ServerHello`] when the server refuses the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReject {
    pub reason: u32,
    pub server_version: u32,
}

impl Message for HandshakeReject {
    const TYPE: MessageType = MessageType::HandshakeReject;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32_le(self.reason);
        buf.put_u32_le(self.server_version);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            reason: reader.u32()?,
            server_version: reader.u32()?,
        })
    }
}

// ============================================================================
// Manifest
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
    pub trans_id: u32,
    pub product: String,
}

impl Message for ManifestRequest {
    const TYPE: MessageType = MessageType::ManifestRequest;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32_le(self.trans_id);
        put_string(buf, &self.product)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            trans_id: reader.u32()?,
            product: reader.string()?,
        })
    }
}

/// Reply to a [`ManifestRequest`].
///
/// `body` holds the serialized entry list and its trailing list checksum;
/// it is parsed by [`crate::manifest::Manifest::decode`]. It is empty when
/// `result` is not [`result_code::OK`](super::result_code::OK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReply {
    pub trans_id: u32,
    pub result: u32,
    pub body: Bytes,
}

impl Message for ManifestReply {
    const TYPE: MessageType = MessageType::ManifestReply;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32_le(self.trans_id);
        buf.put_u32_le(self.result);
        buf.put_slice(&self.body);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            trans_id: reader.u32()?,
            result: reader.u32()?,
            body: Bytes::copy_from_slice(reader.rest()),
        })
    }
}

// ============================================================================
// File download
// ============================================================================

/// Asks for a file's compressed payload starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownloadRequest {
    pub trans_id: u32,
    pub path: String,
    pub offset: u32,
}

impl Message for FileDownloadRequest {
    const TYPE: MessageType = MessageType::FileDownloadRequest;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32_le(self.trans_id);
        put_string(buf, &self.path)?;
        buf.put_u32_le(self.offset);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            trans_id: reader.u32()?,
            path: reader.string()?,
            offset: reader.u32()?,
        })
    }
}

/// One slice of a payload. The transfer is complete once
/// `offset + data.len() == total_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownloadChunk {
    pub trans_id: u32,
    pub result: u32,
    pub total_size: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl FileDownloadChunk {
    /// Whether this chunk ends the transfer.
    pub fn is_last(&self) -> bool {
        self.offset as u64 + self.data.len() as u64 >= self.total_size as u64
    }
}

impl Message for FileDownloadChunk {
    const TYPE: MessageType = MessageType::FileDownloadChunk;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32_le(self.trans_id);
        buf.put_u32_le(self.result);
        buf.put_u32_le(self.total_size);
        buf.put_u32_le(self.offset);
        buf.put_slice(&self.data);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            trans_id: reader.u32()?,
            result: reader.u32()?,
            total_size: reader.u32()?,
            offset: reader.u32()?,
            data: Bytes::copy_from_slice(reader.rest()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_hello_layout() {
        let frame = ClientHello {
            protocol_version: 1,
            build_id: 0x0102,
        }
        .to_frame()
        .unwrap();

        assert_eq!(frame.msg_type, 0x0001);
        assert_eq!(&frame.payload[..], &[1, 0, 0, 0, 0x02, 0x01, 0, 0]);
    }

    #[test]
    fn test_download_request_layout() {
        let frame = FileDownloadRequest {
            trans_id: 3,
            path: "a.dat".into(),
            offset: 100,
        }
        .to_frame()
        .unwrap();

        let mut expected = vec![3, 0, 0, 0, 5, 0];
        expected.extend_from_slice(b"a.dat");
        expected.extend_from_slice(&[100, 0, 0, 0]);
        assert_eq!(&frame.payload[..], &expected[..]);
        assert_eq!(frame.transaction_id(), Some(3));
    }

    #[test]
    fn test_server_hello_requires_full_width() {
        let frame = Frame::new(MessageType::ServerHello.code(), vec![0u8; KEY_BYTES]);
        assert!(matches!(
            ServerHello::from_frame(&frame),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let frame = ClientHello {
            protocol_version: 1,
            build_id: 1,
        }
        .to_frame()
        .unwrap();

        assert_eq!(
            HandshakeReject::from_frame(&frame),
            Err(WireError::UnexpectedType {
                expected: 0x0003,
                actual: 0x0001
            })
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut payload = vec![1, 0, 0, 0, 1, 0, 0, 0];
        payload.push(0xaa);
        let frame = Frame::new(MessageType::HandshakeReject.code(), payload);
        assert_eq!(
            HandshakeReject::from_frame(&frame),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_chunk_completion() {
        let chunk = FileDownloadChunk {
            trans_id: 1,
            result: 0,
            total_size: 10,
            offset: 6,
            data: Bytes::from_static(b"abcd"),
        };
        assert!(chunk.is_last());

        let decoded = FileDownloadChunk::from_frame(&chunk.to_frame().unwrap()).unwrap();
        assert_eq!(decoded, chunk);

        let partial = FileDownloadChunk {
            offset: 0,
            ..chunk
        };
        assert!(!partial.is_last());
    }
}
