#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tos_net::core::header::{Channel, HeaderFlags, PacketHeader};
use tos_net::core::wire_buffer::WireBuffer;
use tos_net::protocol::session::{ClientKeyPair, SecureSession};
use tos_net::utils::buffer_pool::BufferPool;
use tos_net::utils::crc32c;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_sign_verify_heavy() {
    let iterations = 20_000usize;
    let payload_sizes = [0usize, 16, 256, 1000, 1400];

    let mut tasks = JoinSet::new();
    for &size in &payload_sizes {
        tasks.spawn(async move {
            let mut buf = WireBuffer::with_capacity(1500);
            for i in 0..iterations {
                buf.reset();
                let payload = vec![((i + size) & 0xFF) as u8; size];
                buf.write::<u8>(3);
                buf.write_bytes(&payload);
                buf.write_sign();

                let mut inbound = WireBuffer::from_slice(buf.as_slice());
                assert!(inbound.verify_sign().is_ok());
                assert_eq!(inbound.len(), size + 1);
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[test]
fn concurrent_crc_matches_reference() {
    let data: Arc<Vec<u8>> = Arc::new((0..64 * 1024).map(|i| (i * 31 % 251) as u8).collect());
    let expected = crc32c::naive(&data);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let data = Arc::clone(&data);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(crc32c::compute(&data), expected);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn buffer_pool_shared_across_threads() {
    let pool = BufferPool::new(512);
    pool.preallocate(16);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                for i in 0..1_000u32 {
                    let mut buf = pool.acquire();
                    assert!(buf.is_empty());
                    assert_eq!(buf.capacity(), 512);
                    buf.write::<u32>(t * 10_000 + i);
                    pool.release(buf);
                }
                pool.merge();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.created, stats.pooled);
    assert!(pool.global_available() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn buffer_pool_shared_across_tasks() {
    let pool = BufferPool::new(256);
    let mut tasks = JoinSet::new();

    for _ in 0..16 {
        let pool = pool.clone();
        tasks.spawn(async move {
            for _ in 0..500 {
                let mut buf = pool.acquire();
                buf.write_bytes(&[0xAA; 64]);
                tokio::task::yield_now().await;
                pool.release(buf);
            }
            pool.merge();
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    let stats = pool.stats();
    assert_eq!(stats.created, stats.pooled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_session_seals_unique_sequences() {
    let client_keys = ClientKeyPair::generate();
    let (server_public, salt, server) =
        SecureSession::create_as_server(client_keys.public(), 9).unwrap();
    let client =
        SecureSession::initialize_as_client(&client_keys.private_bytes(), &server_public, &salt, 9)
            .unwrap();

    let client = Arc::new(Mutex::new(client));
    let mut tasks = JoinSet::new();
    for t in 0..4u8 {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            let mut sealed = Vec::new();
            for i in 0..50u8 {
                let mut session = client.lock().unwrap();
                let sequence = session.seq_tx();
                let aad = PacketHeader::new(9, Channel::Unreliable, HeaderFlags::ENCRYPTED, sequence)
                    .aad();
                let ciphertext = session.encrypt_payload(&[t, i], &aad).unwrap();
                sealed.push((sequence, aad, ciphertext));
            }
            sealed
        });
    }

    let mut all = Vec::new();
    while let Some(res) = tasks.join_next().await {
        all.extend(res.unwrap());
    }
    all.sort_by_key(|(sequence, _, _)| *sequence);

    let sequences: Vec<u64> = all.iter().map(|(s, _, _)| *s).collect();
    assert_eq!(sequences, (0..200).collect::<Vec<u64>>());

    let mut server = server;
    for (sequence, aad, ciphertext) in all {
        let plain = server.decrypt_payload(&ciphertext, &aad, sequence).unwrap();
        assert_eq!(plain.len(), 2);
    }
    assert_eq!(server.seq_rx_highest(), 199);
}
