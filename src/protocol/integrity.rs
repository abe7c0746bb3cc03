//! Integrity key table answered on `CheckIntegrity` challenges.
//!
//! The server sends an index; the client echoes the 15-bit key stored at that
//! index. Both ends must hold the same table, which is normally shipped with
//! the client build and loaded through [`IntegrityTable::from_keys`].

use crate::error::{ProtocolError, Result};
use rand_core::{OsRng, RngCore};
use tracing::warn;

/// Number of keys in a table
pub const TABLE_SIZE: usize = 2048;

/// Keys are non-negative 16-bit values
pub const KEY_MASK: u16 = 0x7FFF;

#[derive(Clone, PartialEq, Eq)]
pub struct IntegrityTable {
    keys: Box<[u16; TABLE_SIZE]>,
}

impl IntegrityTable {
    /// Random table drawn from the OS generator.
    pub fn generate() -> Self {
        let mut raw = [0u8; TABLE_SIZE * 2];
        OsRng.fill_bytes(&mut raw);

        let mut keys = Box::new([0u16; TABLE_SIZE]);
        for (key, chunk) in keys.iter_mut().zip(raw.chunks_exact(2)) {
            *key = u16::from_le_bytes([chunk[0], chunk[1]]) & KEY_MASK;
        }
        Self { keys }
    }

    /// Load an externally provided table. Values are masked to 15 bits.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigError` unless exactly [`TABLE_SIZE`]
    /// keys are given.
    pub fn from_keys(source: &[u16]) -> Result<Self> {
        if source.len() != TABLE_SIZE {
            return Err(ProtocolError::ConfigError(format!(
                "integrity table needs {TABLE_SIZE} keys, got {}",
                source.len()
            )));
        }
        let mut keys = Box::new([0u16; TABLE_SIZE]);
        for (dst, src) in keys.iter_mut().zip(source) {
            *dst = src & KEY_MASK;
        }
        Ok(Self { keys })
    }

    /// Key for `index`. Out-of-range indices are clamped to the last entry.
    pub fn key(&self, index: u16) -> u16 {
        let slot = usize::from(index);
        if slot >= TABLE_SIZE {
            warn!(index, "integrity index out of range, clamping");
            return self.keys[TABLE_SIZE - 1];
        }
        self.keys[slot]
    }

    pub fn keys(&self) -> &[u16] {
        &self.keys[..]
    }
}

impl Default for IntegrityTable {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Debug for IntegrityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityTable")
            .field("len", &TABLE_SIZE)
            .finish_non_exhaustive()
    }
}
