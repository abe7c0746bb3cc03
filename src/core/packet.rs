//! # Packet Definitions
//!
//! Transport-level packets and the application messages carried inside
//! `Reliable` / `Unreliable` datagrams.
//!
//! ## Layout
//! ```text
//! control:     [PacketType u8] [fields..]                      [CRC32C]
//! application: [PacketType u8] [app id u16] [fields..]         [CRC32C]
//! ```
//! The CRC is handled by the transport, not by the types in this module.
//!
//! Every decode path reads through [`WireBuffer`], so truncated input yields
//! zero-valued fields rather than a panic.

use crate::core::wire_buffer::{Rotator, WireBuffer};
use crate::error::{ProtocolError, Result};
use glam::Vec3;

/// X25519 public key length
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Session salt length
pub const SALT_SIZE: usize = 16;

/// `ConnectionAccepted` body size on an encrypted handshake
pub const SECURE_ACCEPT_SIZE: usize = 4 + PUBLIC_KEY_SIZE + SALT_SIZE;

/// Address validation cookie: timestamp (8), nonce (8), MAC (32)
pub const COOKIE_SIZE: usize = 48;

/// One-byte transport tag. Values are a wire contract with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 0,
    Ping = 1,
    Pong = 2,
    Reliable = 3,
    Unreliable = 4,
    Ack = 5,
    Disconnect = 6,
    Error = 7,
    ConnectionDenied = 8,
    ConnectionAccepted = 9,
    CheckIntegrity = 10,
    Cookie = 13,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Connect,
            1 => Self::Ping,
            2 => Self::Pong,
            3 => Self::Reliable,
            4 => Self::Unreliable,
            5 => Self::Ack,
            6 => Self::Disconnect,
            7 => PacketType::Error,
            8 => Self::ConnectionDenied,
            9 => Self::ConnectionAccepted,
            10 => Self::CheckIntegrity,
            13 => Self::Cookie,
            other => return Err(ProtocolError::UnknownPacket(u16::from(other))),
        })
    }
}

/// Key material delivered by an encrypted `ConnectionAccepted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeKeys {
    pub server_public: [u8; PUBLIC_KEY_SIZE],
    pub salt: [u8; SALT_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionAccepted {
    /// Connection id on the secure path, client id otherwise.
    pub client_id: Option<u32>,
    pub keys: Option<HandshakeKeys>,
}

/// Decoded transport packet.
///
/// For `Reliable` and `Unreliable` the buffer cursor is left on the
/// application id so the payload can be handed on untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `cookie` is only present on the second `Connect` of a cookie
    /// exchange and always follows a public key.
    Connect {
        client_public: Option<[u8; PUBLIC_KEY_SIZE]>,
        cookie: Option<[u8; COOKIE_SIZE]>,
    },
    Ping {
        timestamp: u16,
    },
    Pong {
        timestamp: u16,
    },
    Reliable,
    Unreliable,
    Ack {
        sequence: u16,
    },
    Disconnect,
    Error,
    ConnectionDenied,
    ConnectionAccepted(ConnectionAccepted),
    CheckIntegrity {
        index: u16,
    },
    /// Anti-spoofing token the server wants echoed in the next `Connect`.
    Cookie {
        cookie: [u8; COOKIE_SIZE],
    },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect { .. } => PacketType::Connect,
            Self::Ping { .. } => PacketType::Ping,
            Self::Pong { .. } => PacketType::Pong,
            Self::Reliable => PacketType::Reliable,
            Self::Unreliable => PacketType::Unreliable,
            Self::Ack { .. } => PacketType::Ack,
            Self::Disconnect => PacketType::Disconnect,
            Self::Error => PacketType::Error,
            Self::ConnectionDenied => PacketType::ConnectionDenied,
            Self::ConnectionAccepted(_) => PacketType::ConnectionAccepted,
            Self::CheckIntegrity { .. } => PacketType::CheckIntegrity,
            Self::Cookie { .. } => PacketType::Cookie,
        }
    }

    /// Read the tag and the matching fields from `buf`.
    ///
    /// # Errors
    /// Returns `ProtocolError::UnknownPacket` for an unassigned tag and
    /// `ProtocolError::MalformedPacket` for an empty buffer or a short cookie.
    pub fn decode(buf: &mut WireBuffer) -> Result<Self> {
        if buf.remaining() == 0 {
            return Err(ProtocolError::MalformedPacket("empty datagram".into()));
        }
        let tag = PacketType::try_from(buf.read::<u8>())?;

        Ok(match tag {
            PacketType::Connect => {
                let client_public = (buf.remaining() >= PUBLIC_KEY_SIZE)
                    .then(|| buf.read_array::<PUBLIC_KEY_SIZE>());
                let cookie = (client_public.is_some() && buf.remaining() >= COOKIE_SIZE)
                    .then(|| buf.read_array::<COOKIE_SIZE>());
                Self::Connect {
                    client_public,
                    cookie,
                }
            }
            PacketType::Ping => Self::Ping {
                timestamp: buf.read::<u16>(),
            },
            PacketType::Pong => Self::Pong {
                timestamp: buf.read::<u16>(),
            },
            PacketType::Reliable => Self::Reliable,
            PacketType::Unreliable => Self::Unreliable,
            PacketType::Ack => Self::Ack {
                sequence: buf.read::<u16>(),
            },
            PacketType::Disconnect => Self::Disconnect,
            PacketType::Error => Self::Error,
            PacketType::ConnectionDenied => Self::ConnectionDenied,
            PacketType::ConnectionAccepted => {
                let mut accepted = ConnectionAccepted::default();
                if buf.remaining() >= SECURE_ACCEPT_SIZE {
                    accepted.client_id = Some(buf.read::<u32>());
                    accepted.keys = Some(HandshakeKeys {
                        server_public: buf.read_array::<PUBLIC_KEY_SIZE>(),
                        salt: buf.read_array::<SALT_SIZE>(),
                    });
                } else if buf.remaining() >= 4 {
                    accepted.client_id = Some(buf.read::<u32>());
                }
                Self::ConnectionAccepted(accepted)
            }
            PacketType::CheckIntegrity => Self::CheckIntegrity {
                index: buf.read::<u16>(),
            },
            PacketType::Cookie => {
                if buf.remaining() < COOKIE_SIZE {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "cookie needs {COOKIE_SIZE} bytes, got {}",
                        buf.remaining()
                    )));
                }
                Self::Cookie {
                    cookie: buf.read_array::<COOKIE_SIZE>(),
                }
            }
        })
    }

    /// Write the tag and fields to `buf`. No signature is appended.
    pub fn encode(&self, buf: &mut WireBuffer) {
        buf.write::<u8>(self.packet_type() as u8);
        match self {
            Self::Connect {
                client_public,
                cookie,
            } => {
                if let Some(key) = client_public {
                    buf.write_bytes(key);
                    if let Some(cookie) = cookie {
                        buf.write_bytes(cookie);
                    }
                }
            }
            Self::Cookie { cookie } => buf.write_bytes(cookie),
            Self::Ping { timestamp } | Self::Pong { timestamp } => buf.write::<u16>(*timestamp),
            Self::Ack { sequence } => buf.write::<u16>(*sequence),
            Self::CheckIntegrity { index } => buf.write::<u16>(*index),
            Self::ConnectionAccepted(accepted) => {
                if let Some(id) = accepted.client_id {
                    buf.write::<u32>(id);
                }
                if let Some(keys) = &accepted.keys {
                    buf.write_bytes(&keys.server_public);
                    buf.write_bytes(&keys.salt);
                }
            }
            Self::Reliable
            | Self::Unreliable
            | Self::Disconnect
            | Self::Error
            | Self::ConnectionDenied => {}
        }
    }
}

/// Application ids sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServerPacket {
    Benchmark = 0,
    CreateEntity = 1,
    UpdateEntity = 2,
    RemoveEntity = 3,
    DeltaSync = 4,
    SyncStateInt = 5,
    UpdateEntityQuantized = 6,
}

impl TryFrom<u16> for ServerPacket {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        Ok(match value {
            0 => Self::Benchmark,
            1 => Self::CreateEntity,
            2 => Self::UpdateEntity,
            3 => Self::RemoveEntity,
            4 => Self::DeltaSync,
            5 => Self::SyncStateInt,
            6 => Self::UpdateEntityQuantized,
            other => return Err(ProtocolError::UnknownPacket(other)),
        })
    }
}

/// Application ids sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ClientPacket {
    SyncEntity = 0,
    EnterToWorld = 1,
    RekeyResponse = 2,
    SyncEntityQuantized = 3,
}

impl TryFrom<u16> for ClientPacket {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        Ok(match value {
            0 => Self::SyncEntity,
            1 => Self::EnterToWorld,
            2 => Self::RekeyResponse,
            3 => Self::SyncEntityQuantized,
            other => return Err(ProtocolError::UnknownPacket(other)),
        })
    }
}

/// An application message with a fixed transport tag and application id.
///
/// `serialize` writes the full prefix; `deserialize` expects the cursor to
/// sit just past the application id.
pub trait AppMessage: Sized {
    /// Transport tag the message travels under.
    const TRANSPORT: PacketType;
    const ID: u16;

    fn write_fields(&self, buf: &mut WireBuffer);

    fn read_fields(buf: &mut WireBuffer) -> Self;

    fn serialize(&self, buf: &mut WireBuffer) {
        buf.write::<u8>(Self::TRANSPORT as u8);
        buf.write::<u16>(Self::ID);
        self.write_fields(buf);
    }

    fn deserialize(buf: &mut WireBuffer) -> Self {
        Self::read_fields(buf)
    }
}

macro_rules! app_message {
    ($ty:ty, $transport:ident, $id:expr) => {
        impl $ty {
            pub fn serialize(&self, buf: &mut WireBuffer) {
                <Self as AppMessage>::serialize(self, buf)
            }

            pub fn deserialize(buf: &mut WireBuffer) -> Self {
                <Self as AppMessage>::deserialize(buf)
            }
        }

        impl AppMessage for $ty {
            const TRANSPORT: PacketType = PacketType::$transport;
            const ID: u16 = $id as u16;

            fn write_fields(&self, buf: &mut WireBuffer) {
                self.write_body(buf)
            }

            fn read_fields(buf: &mut WireBuffer) -> Self {
                Self::read_body(buf)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BenchmarkPacket {
    pub id: u32,
    pub position: Vec3,
    pub rotation: Rotator,
}

impl BenchmarkPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.id);
        buf.write_vector(self.position);
        buf.write_rotator(self.rotation);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            id: buf.read::<u32>(),
            position: buf.read_vector(),
            rotation: buf.read_rotator(),
        }
    }
}
app_message!(BenchmarkPacket, Unreliable, ServerPacket::Benchmark);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CreateEntityPacket {
    pub entity_id: u32,
    pub position: Vec3,
    pub rotation: Rotator,
    pub flags: u32,
}

impl CreateEntityPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.entity_id);
        buf.write_vector(self.position);
        buf.write_rotator(self.rotation);
        buf.write::<u32>(self.flags);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            entity_id: buf.read::<u32>(),
            position: buf.read_vector(),
            rotation: buf.read_rotator(),
            flags: buf.read::<u32>(),
        }
    }
}
app_message!(CreateEntityPacket, Reliable, ServerPacket::CreateEntity);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UpdateEntityPacket {
    pub entity_id: u32,
    pub position: Vec3,
    pub rotation: Rotator,
    pub animation_state: u16,
    pub flags: u32,
}

impl UpdateEntityPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.entity_id);
        buf.write_vector(self.position);
        buf.write_rotator(self.rotation);
        buf.write::<u16>(self.animation_state);
        buf.write::<u32>(self.flags);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            entity_id: buf.read::<u32>(),
            position: buf.read_vector(),
            rotation: buf.read_rotator(),
            animation_state: buf.read::<u16>(),
            flags: buf.read::<u32>(),
        }
    }
}
app_message!(UpdateEntityPacket, Unreliable, ServerPacket::UpdateEntity);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveEntityPacket {
    pub entity_id: u32,
}

impl RemoveEntityPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.entity_id);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            entity_id: buf.read::<u32>(),
        }
    }
}
app_message!(RemoveEntityPacket, Reliable, ServerPacket::RemoveEntity);

/// Header of a delta snapshot; the entity payload follows in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeltaSyncPacket {
    pub index: u32,
    pub entities_mask: u8,
}

impl DeltaSyncPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.index);
        buf.write::<u8>(self.entities_mask);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            index: buf.read::<u32>(),
            entities_mask: buf.read::<u8>(),
        }
    }
}
app_message!(DeltaSyncPacket, Unreliable, ServerPacket::DeltaSync);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStateIntPacket;

impl SyncStateIntPacket {
    fn write_body(&self, _buf: &mut WireBuffer) {}

    fn read_body(_buf: &mut WireBuffer) -> Self {
        Self
    }
}
app_message!(SyncStateIntPacket, Reliable, ServerPacket::SyncStateInt);

/// Position relative to a world quadrant.
///
/// `quantized` holds offsets inside the quadrant in [`WireBuffer`]
/// fixed-point units; `quadrant` selects the world cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantizedPosition {
    pub quantized: [i16; 3],
    pub quadrant: [i16; 2],
}

impl QuantizedPosition {
    fn write(&self, buf: &mut WireBuffer) {
        for q in self.quantized {
            buf.write::<i16>(q);
        }
        for q in self.quadrant {
            buf.write::<i16>(q);
        }
    }

    fn read(buf: &mut WireBuffer) -> Self {
        let quantized = [buf.read::<i16>(), buf.read::<i16>(), buf.read::<i16>()];
        let quadrant = [buf.read::<i16>(), buf.read::<i16>()];
        Self {
            quantized,
            quadrant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UpdateEntityQuantizedPacket {
    pub entity_id: u32,
    pub position: QuantizedPosition,
    pub yaw: f32,
    pub velocity: Vec3,
    pub animation_state: u16,
    pub flags: u32,
}

impl UpdateEntityQuantizedPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.entity_id);
        self.position.write(buf);
        buf.write::<f32>(self.yaw);
        buf.write_vector(self.velocity);
        buf.write::<u16>(self.animation_state);
        buf.write::<u32>(self.flags);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            entity_id: buf.read::<u32>(),
            position: QuantizedPosition::read(buf),
            yaw: buf.read::<f32>(),
            velocity: buf.read_vector(),
            animation_state: buf.read::<u16>(),
            flags: buf.read::<u32>(),
        }
    }
}
app_message!(
    UpdateEntityQuantizedPacket,
    Unreliable,
    ServerPacket::UpdateEntityQuantized
);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncEntityPacket {
    pub position: Vec3,
    pub rotation: Rotator,
    pub animation_state: u16,
    pub flags: u32,
}

impl SyncEntityPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write_vector(self.position);
        buf.write_rotator(self.rotation);
        buf.write::<u16>(self.animation_state);
        buf.write::<u32>(self.flags);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            position: buf.read_vector(),
            rotation: buf.read_rotator(),
            animation_state: buf.read::<u16>(),
            flags: buf.read::<u32>(),
        }
    }
}
app_message!(SyncEntityPacket, Unreliable, ClientPacket::SyncEntity);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnterToWorldPacket {
    pub character_id: u32,
}

impl EnterToWorldPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write::<u32>(self.character_id);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            character_id: buf.read::<u32>(),
        }
    }
}
app_message!(EnterToWorldPacket, Unreliable, ClientPacket::EnterToWorld);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RekeyResponsePacket {
    pub accepted: bool,
    pub acknowledged_sequence: u64,
}

impl RekeyResponsePacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        buf.write_bool(self.accepted);
        buf.write::<u64>(self.acknowledged_sequence);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            accepted: buf.read_bool(),
            acknowledged_sequence: buf.read::<u64>(),
        }
    }
}
app_message!(RekeyResponsePacket, Reliable, ClientPacket::RekeyResponse);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncEntityQuantizedPacket {
    pub position: QuantizedPosition,
    pub yaw: f32,
    pub velocity: Vec3,
    pub animation_state: u16,
    pub is_falling: bool,
}

impl SyncEntityQuantizedPacket {
    fn write_body(&self, buf: &mut WireBuffer) {
        self.position.write(buf);
        buf.write::<f32>(self.yaw);
        buf.write_vector(self.velocity);
        buf.write::<u16>(self.animation_state);
        buf.write_bool(self.is_falling);
    }

    fn read_body(buf: &mut WireBuffer) -> Self {
        Self {
            position: QuantizedPosition::read(buf),
            yaw: buf.read::<f32>(),
            velocity: buf.read_vector(),
            animation_state: buf.read::<u16>(),
            is_falling: buf.read_bool(),
        }
    }
}
app_message!(
    SyncEntityQuantizedPacket,
    Unreliable,
    ClientPacket::SyncEntityQuantized
);

/// Every message the server can send inside a data datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Benchmark(BenchmarkPacket),
    CreateEntity(CreateEntityPacket),
    UpdateEntity(UpdateEntityPacket),
    RemoveEntity(RemoveEntityPacket),
    DeltaSync(DeltaSyncPacket),
    SyncStateInt(SyncStateIntPacket),
    UpdateEntityQuantized(UpdateEntityQuantizedPacket),
}

impl ServerMessage {
    /// Decode from a buffer positioned on the application id.
    pub fn decode(buf: &mut WireBuffer) -> Result<Self> {
        let id = ServerPacket::try_from(buf.read::<u16>())?;
        Ok(match id {
            ServerPacket::Benchmark => Self::Benchmark(BenchmarkPacket::deserialize(buf)),
            ServerPacket::CreateEntity => Self::CreateEntity(CreateEntityPacket::deserialize(buf)),
            ServerPacket::UpdateEntity => Self::UpdateEntity(UpdateEntityPacket::deserialize(buf)),
            ServerPacket::RemoveEntity => Self::RemoveEntity(RemoveEntityPacket::deserialize(buf)),
            ServerPacket::DeltaSync => Self::DeltaSync(DeltaSyncPacket::deserialize(buf)),
            ServerPacket::SyncStateInt => Self::SyncStateInt(SyncStateIntPacket::deserialize(buf)),
            ServerPacket::UpdateEntityQuantized => {
                Self::UpdateEntityQuantized(UpdateEntityQuantizedPacket::deserialize(buf))
            }
        })
    }
}

/// Every message the client can send inside a data datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    SyncEntity(SyncEntityPacket),
    EnterToWorld(EnterToWorldPacket),
    RekeyResponse(RekeyResponsePacket),
    SyncEntityQuantized(SyncEntityQuantizedPacket),
}

impl ClientMessage {
    /// Decode from a buffer positioned on the application id.
    pub fn decode(buf: &mut WireBuffer) -> Result<Self> {
        let id = ClientPacket::try_from(buf.read::<u16>())?;
        Ok(match id {
            ClientPacket::SyncEntity => Self::SyncEntity(SyncEntityPacket::deserialize(buf)),
            ClientPacket::EnterToWorld => Self::EnterToWorld(EnterToWorldPacket::deserialize(buf)),
            ClientPacket::RekeyResponse => {
                Self::RekeyResponse(RekeyResponsePacket::deserialize(buf))
            }
            ClientPacket::SyncEntityQuantized => {
                Self::SyncEntityQuantized(SyncEntityQuantizedPacket::deserialize(buf))
            }
        })
    }

    pub fn serialize(&self, buf: &mut WireBuffer) {
        match self {
            Self::SyncEntity(p) => p.serialize(buf),
            Self::EnterToWorld(p) => p.serialize(buf),
            Self::RekeyResponse(p) => p.serialize(buf),
            Self::SyncEntityQuantized(p) => p.serialize(buf),
        }
    }
}
