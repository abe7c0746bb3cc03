//! # Utility Modules
//!
//! Leaf primitives the codec, secure session and transport are built on.
//!
//! ## Components
//! - **CRC32C**: hardware / slicing-by-16 / naive Castagnoli checksum
//! - **LZ4**: greedy LZ4-style block compressor with bounds-checked decoding
//! - **Compression**: threshold gating and metrics around LZ4
//! - **Replay Window**: 64-entry sliding anti-replay bitmask
//! - **Buffer Pool**: thread-local + global free lists of wire buffers
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Decompression is capped and rejects out-of-window back-references
//! - Lookup tables are initialised once behind `once_cell`

pub mod buffer_pool;
pub mod compression;
pub mod crc32c;
pub mod logging;
pub mod lz4;
pub mod metrics;
pub mod replay_window;

pub use buffer_pool::{BufferPool, PoolStats};
pub use replay_window::ReplayWindow;
