//! CLI command implementations.

pub mod checksum;
pub mod common;
pub mod config;
pub mod init;
pub mod manifest;
pub mod patch;
