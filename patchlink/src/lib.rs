//! Patchlink - secure incremental update client
//!
//! Keeps a local install in line with a server manifest over an encrypted,
//! framed TCP protocol.
//!
//! - [`session`]: Diffie-Hellman key agreement and per-session keys
//! - [`transport`]: framing, encryption, connection actors and the session pool
//! - [`protocol`]: message types carried in frames
//! - [`manifest`]: the server file list and how to fetch it
//! - [`checksum`]: streaming MD5 for verifying files
//! - [`patch`]: the update engine
//! - [`config`], [`logging`], [`runtime`]: ambient setup for applications

pub mod checksum;
pub mod config;
pub mod logging;
pub mod manifest;
pub mod patch;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod transport;
