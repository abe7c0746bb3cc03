//! # Protocol Layer
//!
//! Session-level security on top of the core codec.
//!
//! ## Components
//! - **Session**: X25519 + HKDF-SHA256 key agreement and the ChaCha20-Poly1305
//!   channel with replay protection and rekeying
//! - **Integrity**: key table answered on `CheckIntegrity` challenges
//!
//! ## Security
//! - Nonces bind the connection id and a strictly increasing sequence
//! - Failed opens never advance the replay window
//! - Key material is zeroized on drop

pub mod integrity;
pub mod session;

pub use integrity::IntegrityTable;
pub use session::{ClientKeyPair, Role, SecureSession};
