#![no_main]

use libfuzzer_sys::fuzz_target;
use tos_net::core::header::{PacketHeader, HEADER_SIZE};
use tos_net::protocol::session::{ClientKeyPair, SecureSession};

fuzz_target!(|data: &[u8]| {
    let client_keys = ClientKeyPair::generate();
    let Ok((server_public, salt, _server)) =
        SecureSession::create_as_server(client_keys.public(), 1)
    else {
        return;
    };
    let Ok(mut client) =
        SecureSession::initialize_as_client(&client_keys.private_bytes(), &server_public, &salt, 1)
    else {
        return;
    };

    // Forged secure datagrams must be rejected without panicking
    if data.len() >= HEADER_SIZE {
        if let Ok(header) = PacketHeader::from_bytes(data) {
            let opened = client.decrypt_payload_compressed(
                &data[HEADER_SIZE..],
                &header.aad(),
                header.sequence,
                header.is_compressed(),
            );
            assert!(opened.is_err());
        }
    }

    // Arbitrary peer keys: either a session or a key agreement error
    if data.len() >= 32 {
        let _ = SecureSession::initialize_as_client(&client_keys.private_bytes(), &data[..32], &salt, 1);
    }
});
