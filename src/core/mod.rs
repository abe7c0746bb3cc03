//! # Core Protocol Components
//!
//! Binary codec and packet types shared by the plain and secure channels.
//!
//! ## Components
//! - **WireBuffer**: fixed-capacity cursor with varint, bit and quantized fields
//! - **Header**: 14-byte secure-channel header that doubles as AEAD data
//! - **Packet**: transport tags and the application message set
//!
//! ## Wire Format
//! ```text
//! plain:  [Tag(1)] [Payload(N)] [CRC32C(4)]
//! secure: [Header(14)] [Sealed payload(N + 16)]
//! ```

pub mod header;
pub mod packet;
pub mod wire_buffer;
