//! Protocol messages exchanged over the framed transport.
//!
//! # Message catalogue
//!
//! | Code     | Message               | Direction |
//! |----------|-----------------------|-----------|
//! | `0x0001` | [`ClientHello`]         | C → S     |
//! | `0x0002` | [`ServerHello`]         | S → C     |
//! | `0x0003` | [`HandshakeReject`]     | S → C     |
//! | `0x0010` | [`ManifestRequest`]     | C → S     |
//! | `0x0011` | [`ManifestReply`]       | S → C     |
//! | `0x0020` | [`FileDownloadRequest`] | C → S     |
//! | `0x0021` | [`FileDownloadChunk`]   | S → C     |
//!
//! Handshake messages travel in plaintext; everything after
//! [`ServerHello`] is encrypted by the frame codec. Request/reply messages
//! start with a `u32` transaction id, which is how the connection routes
//! replies.

mod messages;
mod wire;

pub use messages::{
    ClientHello, FileDownloadChunk, FileDownloadRequest, HandshakeReject, ManifestReply,
    ManifestRequest, Message, ServerHello,
};
pub use wire::{put_string, WireError, WireReader};

/// Reason code in [`HandshakeReject`] for an unsupported protocol version.
pub const REJECT_VERSION_MISMATCH: u32 = 1;

/// Result codes carried by replies. Zero is success.
pub mod result_code {
    pub const OK: u32 = 0;
    pub const NOT_FOUND: u32 = 1;
    pub const BAD_REQUEST: u32 = 2;
}

/// Message type codes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello = 0x0001,
    ServerHello = 0x0002,
    HandshakeReject = 0x0003,
    ManifestRequest = 0x0010,
    ManifestReply = 0x0011,
    FileDownloadRequest = 0x0020,
    FileDownloadChunk = 0x0021,
}

impl MessageType {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::ClientHello),
            0x0002 => Some(Self::ServerHello),
            0x0003 => Some(Self::HandshakeReject),
            0x0010 => Some(Self::ManifestRequest),
            0x0011 => Some(Self::ManifestReply),
            0x0020 => Some(Self::FileDownloadRequest),
            0x0021 => Some(Self::FileDownloadChunk),
            _ => None,
        }
    }
}
