//! Secure channel tests: key agreement, framing, rekeying and compression
//!
//! Both halves of a session are driven in-process, with datagrams framed the
//! way the transport frames them: `[header(14)] [sealed payload]`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;
use tos_net::core::header::{Channel, HeaderFlags, PacketHeader, HEADER_SIZE};
use tos_net::error::ProtocolError;
use tos_net::protocol::session::{ClientKeyPair, Role, SecureSession, TAG_SIZE};

const CONN_ID: u32 = 0x0102_0304;

fn session_pair() -> (SecureSession, SecureSession) {
    let client_keys = ClientKeyPair::generate();
    let (server_public, salt, server) =
        SecureSession::create_as_server(client_keys.public(), CONN_ID).unwrap();
    let client = SecureSession::initialize_as_client(
        &client_keys.private_bytes(),
        &server_public,
        &salt,
        CONN_ID,
    )
    .unwrap();
    (client, server)
}

/// Seal `plaintext` into a full secure datagram.
fn frame(session: &mut SecureSession, channel: Channel, plaintext: &[u8], compress: bool) -> Vec<u8> {
    let sequence = session.seq_tx();
    let mut header = PacketHeader::new(
        session.connection_id(),
        channel,
        HeaderFlags::ENCRYPTED | HeaderFlags::AEAD_CHACHA20_POLY1305,
        sequence,
    );
    let (body, compressed) = if compress {
        session
            .encrypt_payload_compressed(plaintext, &header.aad())
            .unwrap()
    } else {
        (session.encrypt_payload(plaintext, &header.aad()).unwrap(), false)
    };
    if compressed {
        header.flags |= HeaderFlags::COMPRESSED;
    }

    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&body);
    out
}

/// Parse and open a secure datagram.
fn unframe(session: &mut SecureSession, datagram: &[u8]) -> Result<(PacketHeader, Vec<u8>), ProtocolError> {
    let header = PacketHeader::from_bytes(datagram)?;
    let plain = session.decrypt_payload_compressed(
        &datagram[HEADER_SIZE..],
        &header.aad(),
        header.sequence,
        header.is_compressed(),
    )?;
    Ok((header, plain))
}

#[test]
fn test_roles_and_shared_identity() {
    let (client, server) = session_pair();
    assert_eq!(client.role(), Role::Client);
    assert_eq!(server.role(), Role::Server);
    assert_eq!(client.connection_id(), CONN_ID);
    assert_eq!(client.salt(), server.salt());
    assert_eq!(client.epoch(), 0);
}

#[test]
fn test_framed_exchange_both_directions() {
    let (mut client, mut server) = session_pair();

    for i in 0..10u8 {
        let up = frame(&mut client, Channel::ReliableOrdered, &[i; 40], false);
        assert_eq!(up.len(), HEADER_SIZE + 40 + TAG_SIZE);
        let (header, plain) = unframe(&mut server, &up).unwrap();
        assert_eq!(header.sequence, u64::from(i));
        assert_eq!(header.channel, Channel::ReliableOrdered);
        assert_eq!(plain, vec![i; 40]);

        let down = frame(&mut server, Channel::Unreliable, &[i, i], false);
        let (_, plain) = unframe(&mut client, &down).unwrap();
        assert_eq!(plain, vec![i, i]);
    }

    assert_eq!(client.seq_tx(), 10);
    assert_eq!(server.seq_rx_highest(), 9);
}

#[test]
fn test_reflected_datagram_rejected() {
    let (mut client, _server) = session_pair();
    let up = frame(&mut client, Channel::Unreliable, b"echo", false);
    // A client must not open its own traffic.
    assert!(matches!(
        unframe(&mut client, &up),
        Err(ProtocolError::DecryptionFailure)
    ));
}

#[test]
fn test_header_tamper_rejected() {
    let (mut client, mut server) = session_pair();

    let original = frame(&mut client, Channel::ReliableOrdered, b"move north", false);

    let mut channel_swap = original.clone();
    channel_swap[4] = Channel::Unreliable as u8;
    assert!(matches!(
        unframe(&mut server, &channel_swap),
        Err(ProtocolError::DecryptionFailure)
    ));

    let mut flag_flip = original.clone();
    flag_flip[5] |= HeaderFlags::REKEY.bits();
    assert!(unframe(&mut server, &flag_flip).is_err());

    let mut conn_swap = original.clone();
    conn_swap[0] ^= 0xFF;
    assert!(unframe(&mut server, &conn_swap).is_err());

    // None of the forgeries consumed the sequence.
    let (_, plain) = unframe(&mut server, &original).unwrap();
    assert_eq!(plain, b"move north");
}

#[test]
fn test_sequence_rewrite_rejected() {
    let (mut client, mut server) = session_pair();
    let mut datagram = frame(&mut client, Channel::Unreliable, b"state", false);
    datagram[6] = 9;
    assert!(unframe(&mut server, &datagram).is_err());
}

#[test]
fn test_replayed_datagram_rejected() {
    let (mut client, mut server) = session_pair();
    let datagram = frame(&mut client, Channel::ReliableUnordered, b"once", false);

    unframe(&mut server, &datagram).unwrap();
    assert!(matches!(
        unframe(&mut server, &datagram),
        Err(ProtocolError::ReplayDetected(0))
    ));
}

#[test]
fn test_reordered_delivery_within_window() {
    let (mut client, mut server) = session_pair();
    let datagrams: Vec<Vec<u8>> = (0..20u8)
        .map(|i| frame(&mut client, Channel::Unreliable, &[i], false))
        .collect();

    for datagram in datagrams.iter().rev() {
        unframe(&mut server, datagram).unwrap();
    }
    for datagram in &datagrams {
        assert!(unframe(&mut server, datagram).is_err());
    }
}

#[test]
fn test_compressed_frame_sets_flag() {
    let (mut client, mut server) = session_pair();
    let payload = b"entity-update;".repeat(80);

    let datagram = frame(&mut client, Channel::ReliableOrdered, &payload, true);
    let header = PacketHeader::from_bytes(&datagram).unwrap();
    let (_, plain) = unframe(&mut server, &datagram).unwrap();
    assert_eq!(plain, payload);

    // Sealed output is ciphertext, so compression only wins when the
    // ciphertext happens to repeat; either way the flag must match the body.
    if header.is_compressed() {
        assert!(datagram.len() < HEADER_SIZE + payload.len() + TAG_SIZE);
    } else {
        assert_eq!(datagram.len(), HEADER_SIZE + payload.len() + TAG_SIZE);
    }
}

#[test]
fn test_small_payload_never_compressed() {
    let (mut client, mut server) = session_pair();
    let datagram = frame(&mut client, Channel::Unreliable, &[0u8; 64], true);
    let header = PacketHeader::from_bytes(&datagram).unwrap();
    assert!(!header.is_compressed());
    unframe(&mut server, &datagram).unwrap();
}

#[test]
fn test_compressed_flag_on_raw_body_rejected() {
    let (mut client, mut server) = session_pair();
    let mut datagram = frame(&mut client, Channel::Unreliable, &[7u8; 600], false);
    datagram[5] |= HeaderFlags::COMPRESSED.bits();
    assert!(unframe(&mut server, &datagram).is_err());
}

#[test]
fn test_rekey_keeps_ends_in_step() {
    let (mut client, mut server) = session_pair();

    let before = frame(&mut client, Channel::ReliableOrdered, b"epoch zero", false);
    unframe(&mut server, &before).unwrap();

    client.perform_rekey().unwrap();
    server.perform_rekey().unwrap();
    assert_eq!(client.epoch(), 1);
    assert_eq!(server.epoch(), 1);
    assert_eq!(client.seq_tx(), 0);

    let up = frame(&mut client, Channel::ReliableOrdered, b"epoch one", false);
    let (_, plain) = unframe(&mut server, &up).unwrap();
    assert_eq!(plain, b"epoch one");

    let down = frame(&mut server, Channel::Unreliable, b"ack", false);
    let (_, plain) = unframe(&mut client, &down).unwrap();
    assert_eq!(plain, b"ack");
}

#[test]
fn test_old_epoch_traffic_rejected_after_rekey() {
    let (mut client, mut server) = session_pair();
    let stale = frame(&mut client, Channel::Unreliable, b"stale", false);

    client.perform_rekey().unwrap();
    server.perform_rekey().unwrap();
    assert!(unframe(&mut server, &stale).is_err());
}

#[test]
fn test_one_sided_rekey_breaks_channel() {
    let (mut client, mut server) = session_pair();
    client.perform_rekey().unwrap();
    let up = frame(&mut client, Channel::Unreliable, b"ahead", false);
    assert!(unframe(&mut server, &up).is_err());
}

#[test]
fn test_rekey_due_by_bytes() {
    let (client, _server) = session_pair();
    let mut client = client.with_rekey_policy(1024, Duration::from_secs(3600));
    assert!(!client.should_rekey());

    for _ in 0..4 {
        client.encrypt_payload(&[0u8; 300], b"").unwrap();
    }
    assert!(client.should_rekey());

    client.perform_rekey().unwrap();
    assert!(!client.should_rekey());
    assert_eq!(client.bytes_transmitted(), 0);
}

#[test]
fn test_distinct_sessions_do_not_interoperate() {
    let (mut client_a, _server_a) = session_pair();
    let (_client_b, mut server_b) = session_pair();
    let datagram = frame(&mut client_a, Channel::Unreliable, b"cross", false);
    assert!(unframe(&mut server_b, &datagram).is_err());
}
