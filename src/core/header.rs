//! Secure-channel packet header.
//!
//! ```text
//! [ConnId u32 LE] [Channel u8] [Flags u8] [Sequence u64 LE]   = 14 bytes
//! ```
//!
//! The serialized header is the AEAD associated data for the payload that
//! follows it, so tampering with any header field fails authentication. The
//! one exception is [`HeaderFlags::COMPRESSED`], which is decided after sealing
//! and is masked out of the AAD.

use crate::error::{ProtocolError, Result};
use bitflags::bitflags;

/// Serialized header size in bytes
pub const HEADER_SIZE: usize = 14;

/// Delivery channel carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Channel {
    #[default]
    Unreliable = 0,
    ReliableOrdered = 1,
    ReliableUnordered = 2,
}

impl TryFrom<u8> for Channel {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Unreliable),
            1 => Ok(Self::ReliableOrdered),
            2 => Ok(Self::ReliableUnordered),
            other => Err(ProtocolError::MalformedPacket(format!(
                "unknown channel {other}"
            ))),
        }
    }
}

bitflags! {
    /// Per-datagram header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u8 {
        const ENCRYPTED = 1 << 0;
        const AEAD_CHACHA20_POLY1305 = 1 << 1;
        const REKEY = 1 << 2;
        const FRAGMENT = 1 << 3;
        const COMPRESSED = 1 << 4;
        const ACKNOWLEDGMENT = 1 << 5;
        const RELIABLE_HANDSHAKE = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub connection_id: u32,
    pub channel: Channel,
    pub flags: HeaderFlags,
    pub sequence: u64,
}

impl PacketHeader {
    pub fn new(connection_id: u32, channel: Channel, flags: HeaderFlags, sequence: u64) -> Self {
        Self {
            connection_id,
            channel,
            flags,
            sequence,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.connection_id.to_le_bytes());
        out[4] = self.channel as u8;
        out[5] = self.flags.bits();
        out[6..14].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }

    /// Parse the first [`HEADER_SIZE`] bytes of `bytes`.
    ///
    /// Unknown flag bits and an unknown channel are errors, so every bit of
    /// the header stays covered by the AAD.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedPacket(
                crate::error::constants::ERR_HEADER_TRUNCATED.to_string(),
            ));
        }
        let connection_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let channel = Channel::try_from(bytes[4])?;
        let flags = HeaderFlags::from_bits(bytes[5]).ok_or_else(|| {
            ProtocolError::MalformedPacket(format!("unknown header flags {:#04x}", bytes[5]))
        })?;
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&bytes[6..14]);

        Ok(Self {
            connection_id,
            channel,
            flags,
            sequence: u64::from_le_bytes(seq),
        })
    }

    /// Associated data bound into the AEAD tag.
    pub fn aad(&self) -> [u8; HEADER_SIZE] {
        let mut bound = *self;
        bound.flags.remove(HeaderFlags::COMPRESSED);
        bound.to_bytes()
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(HeaderFlags::ENCRYPTED)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags.contains(HeaderFlags::COMPRESSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian() {
        let header = PacketHeader::new(
            0x0403_0201,
            Channel::ReliableOrdered,
            HeaderFlags::ENCRYPTED | HeaderFlags::AEAD_CHACHA20_POLY1305,
            0x0C0B_0A09_0807_0605,
        );
        assert_eq!(
            header.to_bytes(),
            [1, 2, 3, 4, 1, 0b11, 5, 6, 7, 8, 9, 10, 11, 12]
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_parse_back() {
        let header = PacketHeader::new(
            77,
            Channel::ReliableUnordered,
            HeaderFlags::ENCRYPTED | HeaderFlags::COMPRESSED,
            u64::MAX,
        );
        let parsed = PacketHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_compressed());
    }

    #[test]
    fn test_truncated_and_bad_channel_rejected() {
        assert!(PacketHeader::from_bytes(&[0u8; 13]).is_err());
        let mut bytes = PacketHeader::default().to_bytes();
        bytes[4] = 9;
        assert!(PacketHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_unknown_flag_bit_rejected() {
        let mut bytes = PacketHeader::new(1, Channel::Unreliable, HeaderFlags::ENCRYPTED, 0).to_bytes();
        bytes[5] |= 0x80;
        assert!(matches!(
            PacketHeader::from_bytes(&bytes),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_aad_ignores_compressed_bit() {
        let plain = PacketHeader::new(1, Channel::Unreliable, HeaderFlags::ENCRYPTED, 5);
        let mut compressed = plain;
        compressed.flags.insert(HeaderFlags::COMPRESSED);
        assert_eq!(plain.aad(), compressed.aad());
        assert_ne!(plain.to_bytes(), compressed.to_bytes());
    }
}
