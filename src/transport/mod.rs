//! # Transport Layer
//!
//! The UDP client connection state machine and the callbacks it raises.
//!
//! ## Components
//! - **UdpClient**: connect / retry / keep-alive lifecycle, plain and secure
//!   channels, background retry and poll tasks
//! - **Events**: [`TransportEvents`] callbacks and a channel-backed adapter
//!
//! ## Concurrency
//! - `send` may run concurrently with the poll task; the socket is shared
//!   behind an `Arc` and each path uses its own buffers
//! - `disconnect` joins both background tasks before returning

pub mod events;
pub mod udp_client;

pub use events::{ChannelEvents, NoopEvents, TransportEvent, TransportEvents};
pub use udp_client::{ConnectionStatus, UdpClient};
