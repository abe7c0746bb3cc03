#![no_main]

use libfuzzer_sys::fuzz_target;
use tos_net::core::header::PacketHeader;
use tos_net::core::packet::{ClientMessage, Packet, PacketType, ServerMessage};
use tos_net::core::wire_buffer::WireBuffer;

fuzz_target!(|data: &[u8]| {
    // The receive path: signature check, transport decode, app decode
    let mut buf = WireBuffer::from_slice(data);
    let _ = buf.verify_sign();
    let mut unsigned = WireBuffer::from_slice(data);
    if let Ok(packet) = Packet::decode(&mut unsigned) {
        if matches!(
            packet.packet_type(),
            PacketType::Reliable | PacketType::Unreliable
        ) {
            let mut server_view = unsigned.clone();
            let _ = ServerMessage::decode(&mut server_view);
            let _ = ClientMessage::decode(&mut unsigned);
        }
    }

    let _ = PacketHeader::from_bytes(data);

    // Typed readers must clamp rather than panic on short input
    let mut reader = WireBuffer::from_slice(data);
    let _ = reader.read_varlong();
    let _ = reader.read_utf8_string();
    let _ = reader.read_ascii_string();
    let _ = reader.read_vector();
    let _ = reader.read_rotator();
    let _ = reader.read_vector_full();
    for _ in 0..16 {
        let _ = reader.read_bit();
    }
});
