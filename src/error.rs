//! # Error Types
//!
//! Error handling for the transport, codec and secure session.
//!
//! ## Error Categories
//! - **Transient network errors**: socket I/O and address resolution failures
//! - **Malformed wire data**: checksum mismatches, truncated headers
//! - **Security failures**: AEAD open failures and replay-window rejections
//! - **State misuse**: connecting twice, sending while disconnected
//! - **Compression errors**: capacity overflow, corrupt token streams
//!
//! Short reads inside [`WireBuffer`](crate::core::wire_buffer::WireBuffer) are
//! *not* errors; they return zero values and log instead.
//!
//! ## Example Usage
//! ```rust
//! use tos_net::error::{ProtocolError, Result};
//! use tos_net::utils::lz4;
//! use tracing::{error, info};
//!
//! fn inflate(data: &[u8]) -> Result<Vec<u8>> {
//!     lz4::decompress(data, 4096)
//! }
//!
//! match inflate(&[0x10, b'a']) {
//!     Ok(bytes) => info!(len = bytes.len(), "inflated"),
//!     Err(e) => error!(error = %e, "inflate failed"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection state errors
    pub const ERR_ALREADY_CONNECTING: &str = "Connection attempt already in progress";
    pub const ERR_NO_SOCKET: &str = "Socket is closed";

    /// Address errors
    pub const ERR_NO_ADDRESS: &str = "Host resolved to no usable address";

    /// Key agreement errors
    pub const ERR_KEY_LENGTH: &str = "Key material has the wrong length";
    pub const ERR_NON_CONTRIBUTORY: &str = "Peer public key is low-order or invalid";
    pub const ERR_KDF_EXPAND: &str = "HKDF expand failed";

    /// Secure channel errors
    pub const ERR_SESSION_MISSING: &str = "Secure session is not established";
    pub const ERR_HEADER_TRUNCATED: &str = "Datagram shorter than the secure header";
}

// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown packet tag: {0}")]
    UnknownPacket(u16),

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Replayed or expired sequence number: {0}")]
    ReplayDetected(u64),

    #[error("Key agreement failed: {0}")]
    KeyAgreement(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Logging error: {0}")]
    LoggingError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
