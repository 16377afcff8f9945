//! Primitive field encoding shared by all messages.
//!
//! Integers are little-endian. Strings carry a `u16` length prefix followed
//! by UTF-8 bytes with no terminator.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Errors encoding or decoding a message body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("expected message type {expected:#06x}, got {actual:#06x}")]
    UnexpectedType { expected: u16, actual: u16 },

    #[error("truncated message: needed {needed} byte(s), {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("{0} trailing byte(s) after message")]
    TrailingBytes(usize),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("string of {0} bytes does not fit a u16 length prefix")]
    StringTooLong(usize),
}

/// Cursor over a message body.
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn string(&mut self) -> Result<String, WireError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Fails if any bytes remain.
    pub fn finish(self) -> Result<(), WireError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

/// Writes a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), WireError> {
    let len = u16::try_from(s.len()).map_err(|_| WireError::StringTooLong(s.len()))?;
    buf.put_u16_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_fields() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(7);
        put_string(&mut buf, "data/a.dat").unwrap();
        buf.put_u16_le(0xbeef);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.u32().unwrap(), 7);
        assert_eq!(reader.string().unwrap(), "data/a.dat");
        assert_eq!(reader.u16().unwrap(), 0xbeef);
        reader.finish().unwrap();
    }

    #[test]
    fn test_truncated_string() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(10);
        buf.put_slice(b"abc");

        let mut reader = WireReader::new(&buf);
        assert_eq!(
            reader.string(),
            Err(WireError::Truncated {
                needed: 10,
                available: 3
            })
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let buf = [2u8, 0, 0xff, 0xfe];
        assert_eq!(WireReader::new(&buf).string(), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn test_trailing_bytes() {
        let buf = [1u8, 0, 0, 0, 9];
        let mut reader = WireReader::new(&buf);
        reader.u32().unwrap();
        assert_eq!(reader.finish(), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn test_string_too_long() {
        let mut buf = BytesMut::new();
        let long = "x".repeat(u16::MAX as usize + 1);
        assert_eq!(
            put_string(&mut buf, &long),
            Err(WireError::StringTooLong(long.len()))
        );
    }
}
