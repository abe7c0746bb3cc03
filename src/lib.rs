//! # tos-net
//!
//! Secure, partially-reliable UDP transport for real-time game clients.
//!
//! The crate is layered bottom-up:
//!
//! - **utils**: CRC32C checksums, an LZ4-style compressor, the sliding replay
//!   window, a thread-aware buffer pool, logging and metrics.
//! - **core**: the [`WireBuffer`](core::wire_buffer::WireBuffer) binary codec,
//!   the secure-channel [`PacketHeader`](core::header::PacketHeader) and the
//!   typed packet set.
//! - **protocol**: the AEAD [`SecureSession`](protocol::session::SecureSession)
//!   and the integrity key table.
//! - **transport**: the [`UdpClient`](transport::udp_client::UdpClient)
//!   connection state machine with its retry timer and receive-poll task.
//!
//! ## Wire Format
//! ```text
//! plain:  [Tag(1)] [Payload(N)] [CRC32C(4)]
//! secure: [ConnId(4)] [Channel(1)] [Flags(1)] [Seq(8)] [Sealed payload(N + 16)]
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use tos_net::config::NetworkConfig;
//! use tos_net::transport::events::ChannelEvents;
//! use tos_net::transport::udp_client::UdpClient;
//!
//! # async fn run() -> tos_net::error::Result<()> {
//! let (events, mut rx) = ChannelEvents::new();
//! let client = UdpClient::new(NetworkConfig::default(), events);
//! client.connect("127.0.0.1", 3565).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     tracing::info!(?event, "transport event");
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::wire_buffer::WireBuffer;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::session::SecureSession;
pub use crate::transport::udp_client::{ConnectionStatus, UdpClient};
