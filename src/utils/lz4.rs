//! # LZ4-style Block Compressor
//!
//! Greedy single-pass compressor using the LZ4 token layout. It is *not*
//! bit-compatible with reference LZ4 tooling; both ends of the secure channel
//! must use this module.
//!
//! ## Token Layout
//! ```text
//! [token: lit_len(4) | match_len-4(4)] [lit_len ext..] [literals..]
//! [offset: u16 LE] [match_len ext..]
//! ```
//! Nibbles equal to 15 are extended with `255`-continuation bytes. The stream
//! always ends with a literal-only token.
//!
//! ## Match Finding
//! A 65536-bucket table keyed by a multiplicative hash of the next four bytes
//! keeps only the most recent position per bucket.

use crate::error::{ProtocolError, Result};
use tracing::trace;

/// Shortest encodable match
pub const MIN_MATCH: usize = 4;

const HASH_LOG: u32 = 16;
const HASH_SIZE: usize = 1 << HASH_LOG;
const HASH_MULTIPLIER: u32 = 2_654_435_761;

/// Largest back-reference distance
pub const MAX_OFFSET: usize = 0xFFFF;

#[inline]
fn hash(value: u32) -> usize {
    (value.wrapping_mul(HASH_MULTIPLIER) >> ((MIN_MATCH as u32 * 8) - HASH_LOG)) as usize
}

#[inline]
fn read_u32(src: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

/// Worst-case output size for `len` input bytes
pub fn max_compressed_size(len: usize) -> usize {
    len + len / 255 + 16
}

fn push_length(out: &mut Vec<u8>, mut len: usize) {
    while len >= 255 {
        out.push(255);
        len -= 255;
    }
    out.push(len as u8);
}

/// Compress `src`, returning `None` when the result would not be smaller
/// than the input
pub fn compress(src: &[u8]) -> Option<Vec<u8>> {
    let out = compress_bounded(src, max_compressed_size(src.len()))?;
    if out.len() < src.len() {
        Some(out)
    } else {
        trace!(
            input = src.len(),
            output = out.len(),
            "compression not beneficial"
        );
        None
    }
}

/// Compress `src` into at most `capacity` bytes
///
/// Returns `None` if the encoded stream would exceed `capacity`.
pub fn compress_bounded(src: &[u8], capacity: usize) -> Option<Vec<u8>> {
    let mut table = vec![0u32; HASH_SIZE];
    let mut out = Vec::with_capacity(capacity.min(max_compressed_size(src.len())));

    let len = src.len();
    let mf_limit = len.saturating_sub(MIN_MATCH);
    let mut ip = 0usize;
    let mut anchor = 0usize;

    while ip < mf_limit {
        let sequence = read_u32(src, ip);
        let h = hash(sequence);
        let candidate = table[h] as usize;
        table[h] = ip as u32;

        if candidate < ip && ip - candidate < MAX_OFFSET && read_u32(src, candidate) == sequence {
            let literal_len = ip - anchor;
            if out.len() + 1 + literal_len + 8 > capacity {
                return None;
            }

            let token_at = out.len();
            out.push(0);
            if literal_len >= 15 {
                out[token_at] = 15 << 4;
                push_length(&mut out, literal_len - 15);
            } else {
                out[token_at] = (literal_len as u8) << 4;
            }
            out.extend_from_slice(&src[anchor..ip]);

            let offset = (ip - candidate) as u16;
            out.extend_from_slice(&offset.to_le_bytes());

            ip += MIN_MATCH;
            let mut reference = candidate + MIN_MATCH;
            let mut match_len = 0usize;

            while ip < mf_limit && read_u32(src, ip) == read_u32(src, reference) {
                ip += 4;
                reference += 4;
                match_len += 4;
            }
            while ip < len && src[ip] == src[reference] {
                ip += 1;
                reference += 1;
                match_len += 1;
            }

            if match_len >= 15 {
                out[token_at] |= 15;
                push_length(&mut out, match_len - 15);
            } else {
                out[token_at] |= match_len as u8;
            }

            anchor = ip;
            if out.len() + 5 > capacity {
                return None;
            }
            continue;
        }

        ip += 1;
    }

    let last_literals = len - anchor;
    if out.len() + last_literals + last_literals / 255 + 2 > capacity {
        return None;
    }

    if last_literals >= 15 {
        out.push(15 << 4);
        push_length(&mut out, last_literals - 15);
    } else {
        out.push((last_literals as u8) << 4);
    }
    out.extend_from_slice(&src[anchor..]);

    Some(out)
}

fn read_length(src: &[u8], ip: &mut usize, mut len: usize) -> Result<usize> {
    loop {
        let byte = *src.get(*ip).ok_or(ProtocolError::DecompressionFailure)?;
        *ip += 1;
        len = len
            .checked_add(byte as usize)
            .ok_or(ProtocolError::DecompressionFailure)?;
        if byte != 255 {
            return Ok(len);
        }
    }
}

/// Decompress `src` into at most `capacity` bytes
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if the stream is truncated,
/// references data before the start of the output, or would exceed
/// `capacity`.
pub fn decompress(src: &[u8], capacity: usize) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(capacity.min(src.len().saturating_mul(4)));
    let mut ip = 0usize;

    while ip < src.len() {
        let token = src[ip];
        ip += 1;

        let mut literal_len = (token >> 4) as usize;
        if literal_len == 15 {
            literal_len = read_length(src, &mut ip, literal_len)?;
        }

        let literal_end = ip
            .checked_add(literal_len)
            .ok_or(ProtocolError::DecompressionFailure)?;
        if literal_end > src.len() || out.len() + literal_len > capacity {
            return Err(ProtocolError::DecompressionFailure);
        }
        out.extend_from_slice(&src[ip..literal_end]);
        ip = literal_end;

        if ip >= src.len() {
            break;
        }

        if ip + 2 > src.len() {
            return Err(ProtocolError::DecompressionFailure);
        }
        let offset = u16::from_le_bytes([src[ip], src[ip + 1]]) as usize;
        ip += 2;
        if offset == 0 || offset > out.len() {
            return Err(ProtocolError::DecompressionFailure);
        }

        let mut match_len = (token & 0x0F) as usize;
        if match_len == 15 {
            match_len = read_length(src, &mut ip, match_len)?;
        }
        match_len += MIN_MATCH;

        if out.len() + match_len > capacity {
            return Err(ProtocolError::DecompressionFailure);
        }

        // Overlapping copies replicate the window byte by byte.
        let start = out.len() - offset;
        for i in 0..match_len {
            let byte = out[start + i];
            out.push(byte);
        }
    }

    Ok(out)
}
