//! # CRC32C (Castagnoli)
//!
//! Reflected CRC-32C over arbitrary byte ranges, bit-for-bit identical to the
//! iSCSI checksum and to the SSE4.2 / ARMv8 `crc32c` instructions.
//!
//! ## Strategies
//! - **Hardware**: 8 bytes per instruction with a byte tail
//! - **Slicing-by-16**: sixteen 256-entry tables, 16-byte blocks
//! - **Naive**: one bit at a time, kept for portability and cross-checks
//!
//! The strategy is selected on first use and cached. The lookup tables are
//! built once behind a [`Lazy`] static.
//!
//! ## Example
//! ```rust
//! use tos_net::utils::crc32c;
//!
//! assert_eq!(crc32c::compute(b"123456789"), 0xE306_9283);
//! ```

use once_cell::sync::Lazy;
use tracing::debug;

/// Reflected form of the Castagnoli polynomial `0x1EDC6F41`
pub const POLYNOMIAL: u32 = 0x82F6_3B78;

const INITIAL: u32 = 0xFFFF_FFFF;

/// Implementation used to compute a checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Hardware,
    Slicing16,
    Naive,
}

static TABLES: Lazy<Box<[[u32; 256]; 16]>> = Lazy::new(build_tables);

static STRATEGY: Lazy<Strategy> = Lazy::new(|| {
    let strategy = if hardware_available() {
        Strategy::Hardware
    } else {
        Strategy::Slicing16
    };
    debug!(?strategy, "CRC32C strategy selected");
    strategy
});

fn build_tables() -> Box<[[u32; 256]; 16]> {
    let mut tables = Box::new([[0u32; 256]; 16]);

    for i in 0..256u32 {
        let mut crc = i;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
        }
        tables[0][i as usize] = crc;
    }

    for k in 1..16 {
        for i in 0..256 {
            let prev = tables[k - 1][i];
            tables[k][i] = (prev >> 8) ^ tables[0][(prev & 0xFF) as usize];
        }
    }

    tables
}

/// Strategy chosen for this CPU
pub fn active_strategy() -> Strategy {
    *STRATEGY
}

/// Whether a CRC32C instruction can be used on this CPU
pub fn hardware_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("sse4.2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("crc")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// Compute the CRC32C of `data` with the cached strategy
pub fn compute(data: &[u8]) -> u32 {
    compute_with(active_strategy(), data)
}

/// Compute the CRC32C of `data` with an explicit strategy
///
/// `Strategy::Hardware` falls back to slicing-by-16 when the instruction is
/// not available.
pub fn compute_with(strategy: Strategy, data: &[u8]) -> u32 {
    match strategy {
        Strategy::Hardware => hardware(data).unwrap_or_else(|| slicing16(data)),
        Strategy::Slicing16 => slicing16(data),
        Strategy::Naive => naive(data),
    }
}

/// Bit-at-a-time reference implementation
pub fn naive(data: &[u8]) -> u32 {
    let mut crc = INITIAL;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLYNOMIAL & mask);
        }
    }
    !crc
}

/// Slicing-by-16 table implementation
pub fn slicing16(data: &[u8]) -> u32 {
    let t = &**TABLES;
    let mut crc = INITIAL;

    let mut blocks = data.chunks_exact(16);
    for b in &mut blocks {
        crc ^= u32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        let a = t[15][(crc & 0xFF) as usize]
            ^ t[14][((crc >> 8) & 0xFF) as usize]
            ^ t[13][((crc >> 16) & 0xFF) as usize]
            ^ t[12][(crc >> 24) as usize];
        let c = t[11][b[4] as usize]
            ^ t[10][b[5] as usize]
            ^ t[9][b[6] as usize]
            ^ t[8][b[7] as usize];
        let d = t[7][b[8] as usize]
            ^ t[6][b[9] as usize]
            ^ t[5][b[10] as usize]
            ^ t[4][b[11] as usize];
        let e = t[3][b[12] as usize]
            ^ t[2][b[13] as usize]
            ^ t[1][b[14] as usize]
            ^ t[0][b[15] as usize];

        crc = a ^ c ^ d ^ e;
    }

    for &byte in blocks.remainder() {
        crc = (crc >> 8) ^ t[0][((crc ^ u32::from(byte)) & 0xFF) as usize];
    }

    !crc
}

/// Hardware implementation, `None` when the CPU lacks the instruction
pub fn hardware(data: &[u8]) -> Option<u32> {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse4.2") {
            // SAFETY: the required target feature was detected above.
            return Some(unsafe { hw_x86::crc32c(data) });
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if std::arch::is_aarch64_feature_detected!("crc") {
            // SAFETY: the required target feature was detected above.
            return Some(unsafe { hw_arm::crc32c(data) });
        }
    }
    let _ = data;
    None
}

#[cfg(target_arch = "x86_64")]
mod hw_x86 {
    use std::arch::x86_64::{_mm_crc32_u64, _mm_crc32_u8};

    #[target_feature(enable = "sse4.2")]
    pub(super) unsafe fn crc32c(data: &[u8]) -> u32 {
        let mut crc = u64::from(super::INITIAL);
        let mut words = data.chunks_exact(8);
        for w in &mut words {
            let v = u64::from_le_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]);
            crc = _mm_crc32_u64(crc, v);
        }
        let mut crc = crc as u32;
        for &byte in words.remainder() {
            crc = _mm_crc32_u8(crc, byte);
        }
        !crc
    }
}

#[cfg(target_arch = "aarch64")]
mod hw_arm {
    use std::arch::aarch64::{__crc32cb, __crc32cd};

    #[target_feature(enable = "crc")]
    pub(super) unsafe fn crc32c(data: &[u8]) -> u32 {
        let mut crc = super::INITIAL;
        let mut words = data.chunks_exact(8);
        for w in &mut words {
            let v = u64::from_le_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]);
            crc = __crc32cd(crc, v);
        }
        for &byte in words.remainder() {
            crc = __crc32cb(crc, byte);
        }
        !crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_check_vector_all_strategies() {
        assert_eq!(naive(CHECK), 0xE306_9283);
        assert_eq!(slicing16(CHECK), 0xE306_9283);
        assert_eq!(compute(CHECK), 0xE306_9283);
        if let Some(hw) = hardware(CHECK) {
            assert_eq!(hw, 0xE306_9283);
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(naive(&[]), 0);
        assert_eq!(slicing16(&[]), 0);
        assert_eq!(compute(&[]), 0);
    }

    #[test]
    fn test_known_iscsi_vectors() {
        // RFC 3720 B.4
        assert_eq!(compute(&[0u8; 32]), 0x8A91_36AA);
        assert_eq!(compute(&[0xFFu8; 32]), 0x62A8_AB43);
        let ascending: Vec<u8> = (0u8..32).collect();
        assert_eq!(compute(&ascending), 0x46DD_794E);
    }

    #[test]
    fn test_strategies_agree_across_block_boundaries() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 + 3) as u8).collect();
        for len in [0, 1, 7, 8, 9, 15, 16, 17, 31, 32, 33, 100, 1000] {
            let slice = &data[..len];
            let expected = naive(slice);
            assert_eq!(slicing16(slice), expected, "len {len}");
            assert_eq!(compute_with(Strategy::Hardware, slice), expected, "len {len}");
        }
    }

    #[test]
    fn test_table_zero_matches_polynomial() {
        assert_eq!(TABLES[0][1], 0xF26B_8303);
        assert_eq!(TABLES[0][128], POLYNOMIAL);
    }
}
