//! # WireBuffer
//!
//! Fixed-capacity byte cursor used to build and parse every datagram.
//!
//! Values are read back in the order they were written; there is no field
//! lookup. The buffer tracks two offsets:
//!
//! - `position`: the cursor shared by reads and writes
//! - `length`: the high-water mark of written (or loaded) bytes
//!
//! ## Encodings
//! - Fixed-width integers and floats: little-endian, natural width
//! - `varint` / `varlong`: zigzag then base-128; unsigned variants skip zigzag
//! - Strings: `u32` length prefix then UTF-8 (or `?`-clamped ASCII)
//! - Bits: eight per byte, LSB first, flushed by [`WireBuffer::align_bits`]
//! - Vectors and rotators: three `i16` holding `round(c / 0.1)`
//!
//! ## Bounds Policy
//! Writes past capacity are dropped and logged. Reads past the loaded length
//! return the type's zero value and log. Neither panics, so a short or
//! malformed datagram cannot disrupt the receive loop.
//!
//! ## Example
//! ```rust
//! use tos_net::core::wire_buffer::WireBuffer;
//!
//! let mut buf = WireBuffer::with_capacity(64);
//! buf.write::<u8>(3);
//! buf.write_varint(-42);
//! buf.set_position(0);
//! assert_eq!(buf.read::<u8>(), 3);
//! assert_eq!(buf.read_varint(), -42);
//! ```

use crate::error::{ProtocolError, Result};
use crate::utils::crc32c;
use glam::Vec3;
use std::fmt::Write as _;
use tracing::{trace, warn};

/// Default buffer capacity, one MTU-sized datagram
pub const DEFAULT_CAPACITY: usize = 1500;

/// Fixed-point step used for quantized vectors and rotators
pub const QUANTIZATION_STEP: f32 = 0.1;

/// Size of the trailing CRC32C signature
pub const SIGNATURE_SIZE: usize = 4;

/// Euler rotation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rotator {
    pub const ZERO: Self = Self {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// A plain value with a fixed little-endian wire width.
pub trait WireValue: Copy + Default {
    const SIZE: usize;

    fn encode(self, out: &mut [u8]);

    fn decode(src: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(src: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(src);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_wire_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

#[inline]
fn zigzag32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
fn unzigzag32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

#[inline]
fn zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[inline]
fn quantize(component: f32) -> i16 {
    // `as` saturates out-of-range floats and maps NaN to 0.
    (component / QUANTIZATION_STEP).round() as i16
}

#[inline]
fn dequantize(value: i16) -> f32 {
    f32::from(value) * QUANTIZATION_STEP
}

/// Byte cursor with clamp-and-warn bounds handling
#[derive(Clone)]
pub struct WireBuffer {
    data: Vec<u8>,
    position: usize,
    length: usize,
    write_bits: u8,
    write_bit_index: u8,
    read_bits: u8,
    read_bit_index: u8,
}

impl Default for WireBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for WireBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBuffer")
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("length", &self.length)
            .finish()
    }
}

impl WireBuffer {
    /// Create an empty buffer of [`DEFAULT_CAPACITY`] bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            position: 0,
            length: 0,
            write_bits: 0,
            write_bit_index: 0,
            read_bits: 0,
            read_bit_index: 0,
        }
    }

    /// Create a buffer loaded with `bytes`, cursor at the start.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::with_capacity(bytes.len());
        buffer.data.copy_from_slice(bytes);
        buffer.length = bytes.len();
        buffer
    }

    /// Replace the contents with `bytes`, truncating to capacity.
    pub fn load(&mut self, bytes: &[u8]) {
        let len = if bytes.len() > self.capacity() {
            warn!(
                len = bytes.len(),
                capacity = self.capacity(),
                "WireBuffer::load - source exceeds capacity, truncating"
            );
            self.capacity()
        } else {
            bytes.len()
        };
        self.reset();
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.length = len;
    }

    /// Rewind the cursor and forget all contents.
    pub fn reset(&mut self) {
        self.position = 0;
        self.length = 0;
        self.write_bits = 0;
        self.write_bit_index = 0;
        self.read_bits = 0;
        self.read_bit_index = 0;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor, clamped to `0..=capacity`.
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.capacity());
    }

    /// Number of written or loaded bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes left to read before the end of the loaded data.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.length.saturating_sub(self.position)
    }

    /// The written or loaded bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The unread tail of the loaded bytes.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.position.min(self.length)..self.length]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    #[inline]
    fn advance_write(&mut self, size: usize) {
        self.position += size;
        if self.position > self.length {
            self.length = self.position;
        }
    }

    #[inline]
    fn can_write(&self, size: usize, what: &'static str) -> bool {
        if self.position + size > self.capacity() {
            warn!(
                size,
                position = self.position,
                capacity = self.capacity(),
                what,
                "WireBuffer overflow - write dropped"
            );
            return false;
        }
        true
    }

    #[inline]
    fn can_read(&self, size: usize, what: &'static str) -> bool {
        if self.position + size > self.length {
            warn!(
                size,
                position = self.position,
                length = self.length,
                what,
                "WireBuffer underflow - returning zero value"
            );
            return false;
        }
        true
    }

    /// Write a fixed-width little-endian value.
    pub fn write<T: WireValue>(&mut self, value: T) {
        if !self.can_write(T::SIZE, std::any::type_name::<T>()) {
            return;
        }
        value.encode(&mut self.data[self.position..self.position + T::SIZE]);
        self.advance_write(T::SIZE);
    }

    /// Read a fixed-width little-endian value, zero on underflow.
    pub fn read<T: WireValue>(&mut self) -> T {
        if !self.can_read(T::SIZE, std::any::type_name::<T>()) {
            return T::default();
        }
        let value = T::decode(&self.data[self.position..self.position + T::SIZE]);
        self.position += T::SIZE;
        value
    }

    /// Read a value without moving the cursor.
    pub fn peek<T: WireValue>(&self) -> T {
        if !self.can_read(T::SIZE, std::any::type_name::<T>()) {
            return T::default();
        }
        T::decode(&self.data[self.position..self.position + T::SIZE])
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write::<u8>(u8::from(value));
    }

    pub fn read_bool(&mut self) -> bool {
        self.read::<u8>() != 0
    }

    /// Write raw bytes. Dropped entirely if they do not fit.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if !self.can_write(bytes.len(), "bytes") {
            return;
        }
        self.data[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.advance_write(bytes.len());
    }

    /// Read `len` raw bytes, empty on underflow.
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        if !self.can_read(len, "bytes") {
            return Vec::new();
        }
        let bytes = self.data[self.position..self.position + len].to_vec();
        self.position += len;
        bytes
    }

    /// Read exactly `N` bytes into an array, zeroed on underflow.
    pub fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if self.can_read(N, "array") {
            out.copy_from_slice(&self.data[self.position..self.position + N]);
            self.position += N;
        }
        out
    }

    fn write_raw_varint(&mut self, mut value: u64) {
        let mut encoded = [0u8; 10];
        let mut n = 0;
        while value >= 0x80 {
            encoded[n] = (value as u8) | 0x80;
            value >>= 7;
            n += 1;
        }
        encoded[n] = value as u8;
        self.write_bytes(&encoded[..=n]);
    }

    fn read_raw_varint(&mut self, max_bytes: usize) -> u64 {
        let start = self.position;
        let mut result = 0u64;
        for i in 0..max_bytes {
            if self.position >= self.length {
                warn!(position = start, "WireBuffer underflow - truncated varint");
                self.position = self.length;
                return 0;
            }
            let byte = self.data[self.position];
            self.position += 1;
            result |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return result;
            }
        }
        warn!(position = start, "WireBuffer - malformed varint exceeds width");
        0
    }

    /// Zigzag then base-128 encode an `i32`.
    pub fn write_varint(&mut self, value: i32) {
        self.write_raw_varint(u64::from(zigzag32(value)));
    }

    pub fn read_varint(&mut self) -> i32 {
        unzigzag32(self.read_raw_varint(5) as u32)
    }

    /// Zigzag then base-128 encode an `i64`.
    pub fn write_varlong(&mut self, value: i64) {
        self.write_raw_varint(zigzag64(value));
    }

    pub fn read_varlong(&mut self) -> i64 {
        unzigzag64(self.read_raw_varint(10))
    }

    pub fn write_varuint(&mut self, value: u32) {
        self.write_raw_varint(u64::from(value));
    }

    pub fn read_varuint(&mut self) -> u32 {
        self.read_raw_varint(5) as u32
    }

    pub fn write_varulong(&mut self, value: u64) {
        self.write_raw_varint(value);
    }

    pub fn read_varulong(&mut self) -> u64 {
        self.read_raw_varint(10)
    }

    /// Write a `u32` length prefix followed by the UTF-8 bytes.
    pub fn write_utf8_string(&mut self, value: &str) {
        self.write_prefixed(value.as_bytes());
    }

    pub fn read_utf8_string(&mut self) -> String {
        let bytes = self.read_prefixed();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Write a length-prefixed string with every non-ASCII char replaced by `?`.
    pub fn write_ascii_string(&mut self, value: &str) {
        let clamped: Vec<u8> = value
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect();
        self.write_prefixed(&clamped);
    }

    pub fn read_ascii_string(&mut self) -> String {
        self.read_prefixed()
            .into_iter()
            .map(|b| if b.is_ascii() { b as char } else { '?' })
            .collect()
    }

    fn write_prefixed(&mut self, bytes: &[u8]) {
        let Ok(len) = u32::try_from(bytes.len()) else {
            warn!(len = bytes.len(), "WireBuffer - string too long, dropped");
            return;
        };
        if !self.can_write(4 + bytes.len(), "string") {
            return;
        }
        self.write::<u32>(len);
        self.write_bytes(bytes);
    }

    fn read_prefixed(&mut self) -> Vec<u8> {
        let len = self.read::<u32>() as usize;
        if len == 0 {
            return Vec::new();
        }
        if len > self.remaining() {
            warn!(
                len,
                remaining = self.remaining(),
                "WireBuffer - string length exceeds data"
            );
            return Vec::new();
        }
        self.read_bytes(len)
    }

    /// Append one bit, LSB first. A full byte is flushed at the cursor.
    pub fn write_bit(&mut self, value: bool) {
        if value {
            self.write_bits |= 1 << self.write_bit_index;
        }
        self.write_bit_index += 1;
        if self.write_bit_index == 8 {
            let byte = self.write_bits;
            self.write_bits = 0;
            self.write_bit_index = 0;
            self.write::<u8>(byte);
        }
    }

    /// Read one bit, LSB first, loading a new byte when needed.
    pub fn read_bit(&mut self) -> bool {
        if self.read_bit_index == 0 {
            self.read_bits = self.read::<u8>();
        }
        let bit = (self.read_bits >> self.read_bit_index) & 1 == 1;
        self.read_bit_index = (self.read_bit_index + 1) % 8;
        bit
    }

    /// Round both bit cursors up to the next byte boundary.
    pub fn align_bits(&mut self) {
        if self.write_bit_index > 0 {
            let byte = self.write_bits;
            self.write_bits = 0;
            self.write_bit_index = 0;
            self.write::<u8>(byte);
        }
        self.read_bits = 0;
        self.read_bit_index = 0;
    }

    /// Write a vector quantized to [`QUANTIZATION_STEP`].
    pub fn write_vector(&mut self, value: Vec3) {
        if !self.can_write(6, "vector") {
            return;
        }
        self.write::<i16>(quantize(value.x));
        self.write::<i16>(quantize(value.y));
        self.write::<i16>(quantize(value.z));
    }

    pub fn read_vector(&mut self) -> Vec3 {
        if !self.can_read(6, "vector") {
            return Vec3::ZERO;
        }
        let x = dequantize(self.read::<i16>());
        let y = dequantize(self.read::<i16>());
        let z = dequantize(self.read::<i16>());
        Vec3::new(x, y, z)
    }

    pub fn write_rotator(&mut self, value: Rotator) {
        if !self.can_write(6, "rotator") {
            return;
        }
        self.write::<i16>(quantize(value.pitch));
        self.write::<i16>(quantize(value.yaw));
        self.write::<i16>(quantize(value.roll));
    }

    pub fn read_rotator(&mut self) -> Rotator {
        if !self.can_read(6, "rotator") {
            return Rotator::ZERO;
        }
        let pitch = dequantize(self.read::<i16>());
        let yaw = dequantize(self.read::<i16>());
        let roll = dequantize(self.read::<i16>());
        Rotator::new(pitch, yaw, roll)
    }

    /// Write a vector as three zigzag varints of the components truncated
    /// toward zero, matching the server's integer cast.
    pub fn write_vector_full(&mut self, value: Vec3) {
        self.write_varint(value.x as i32);
        self.write_varint(value.y as i32);
        self.write_varint(value.z as i32);
    }

    pub fn read_vector_full(&mut self) -> Vec3 {
        let x = self.read_varint() as f32;
        let y = self.read_varint() as f32;
        let z = self.read_varint() as f32;
        Vec3::new(x, y, z)
    }

    /// Append the CRC32C of every byte written so far.
    pub fn write_sign(&mut self) {
        let crc = crc32c::compute(self.as_slice());
        self.position = self.length;
        self.write::<u32>(crc);
    }

    /// Trailing four-byte signature. Does not move the cursor.
    pub fn read_sign(&self) -> u32 {
        if self.length < SIGNATURE_SIZE {
            warn!(length = self.length, "WireBuffer - too short for a signature");
            return 0;
        }
        u32::decode(&self.data[self.length - SIGNATURE_SIZE..self.length])
    }

    /// Check the trailing signature and drop it from the logical length.
    ///
    /// # Errors
    /// Returns `ProtocolError::ChecksumMismatch` if the signature does not
    /// match, leaving the buffer unchanged.
    pub fn verify_sign(&mut self) -> Result<()> {
        if self.length < SIGNATURE_SIZE {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} bytes is too short for a signature",
                self.length
            )));
        }
        let expected = self.read_sign();
        let computed = crc32c::compute(&self.data[..self.length - SIGNATURE_SIZE]);
        if expected != computed {
            return Err(ProtocolError::ChecksumMismatch { expected, computed });
        }
        self.length -= SIGNATURE_SIZE;
        if self.position > self.length {
            self.position = self.length;
        }
        trace!(length = self.length, "signature verified");
        Ok(())
    }

    /// djb2-style hash (`hash * 33 + b`) of the written bytes.
    pub fn hash_fast(&self) -> u32 {
        self.as_slice().iter().fold(0u32, |hash, &b| {
            (hash << 5).wrapping_add(hash).wrapping_add(u32::from(b))
        })
    }

    /// Uppercase hex dump of the written bytes.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.length * 2);
        for b in self.as_slice() {
            let _ = write!(out, "{b:02X}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewind(buf: &mut WireBuffer) {
        buf.set_position(0);
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut buf = WireBuffer::with_capacity(32);
        buf.write::<u16>(0x1234);
        buf.write::<i32>(-2);
        buf.write::<f32>(1.5);
        assert_eq!(&buf.as_slice()[..2], &[0x34, 0x12]);
        assert_eq!(&buf.as_slice()[2..6], &[0xFE, 0xFF, 0xFF, 0xFF]);

        rewind(&mut buf);
        assert_eq!(buf.read::<u16>(), 0x1234);
        assert_eq!(buf.read::<i32>(), -2);
        assert_eq!(buf.read::<f32>(), 1.5);
    }

    #[test]
    fn test_varint_extremes() {
        let values = [i32::MIN, -1, 0, 1, 63, -64, 64, i32::MAX];
        let mut buf = WireBuffer::with_capacity(64);
        for v in values {
            buf.write_varint(v);
        }
        rewind(&mut buf);
        for v in values {
            assert_eq!(buf.read_varint(), v);
        }
    }

    #[test]
    fn test_varlong_extremes() {
        let values = [i64::MIN, -1, 0, i64::MAX];
        let mut buf = WireBuffer::with_capacity(64);
        for v in values {
            buf.write_varlong(v);
        }
        rewind(&mut buf);
        for v in values {
            assert_eq!(buf.read_varlong(), v);
        }
    }

    #[test]
    fn test_zigzag_small_magnitudes_are_one_byte() {
        let mut buf = WireBuffer::with_capacity(8);
        buf.write_varint(-1);
        assert_eq!(buf.as_slice(), &[0x01]);
        buf.write_varint(1);
        assert_eq!(buf.as_slice(), &[0x01, 0x02]);
    }

    #[test]
    fn test_unsigned_varint_skips_zigzag() {
        let mut buf = WireBuffer::with_capacity(16);
        buf.write_varuint(300);
        assert_eq!(buf.as_slice(), &[0xAC, 0x02]);
        buf.write_varulong(u64::MAX);
        rewind(&mut buf);
        assert_eq!(buf.read_varuint(), 300);
        assert_eq!(buf.read_varulong(), u64::MAX);
    }

    #[test]
    fn test_overflow_write_is_dropped() {
        let mut buf = WireBuffer::with_capacity(3);
        buf.write::<u16>(7);
        buf.write::<u32>(0xDEAD_BEEF);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.position(), 2);
        buf.write_varint(i32::MIN);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_underflow_read_returns_zero() {
        let mut buf = WireBuffer::from_slice(&[1, 2, 3]);
        assert_eq!(buf.read::<u64>(), 0);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.read::<u16>(), 0x0201);
        assert_eq!(buf.read::<u32>(), 0);
        assert_eq!(buf.read_utf8_string(), "");
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut buf = WireBuffer::from_slice(&[9, 0, 0, 0]);
        assert_eq!(buf.peek::<u32>(), 9);
        assert_eq!(buf.peek::<u8>(), 9);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.read::<u32>(), 9);
    }

    #[test]
    fn test_strings() {
        let mut buf = WireBuffer::with_capacity(64);
        buf.write_utf8_string("héllo");
        buf.write_ascii_string("naïve");
        rewind(&mut buf);
        assert_eq!(buf.read_utf8_string(), "héllo");
        assert_eq!(buf.read_ascii_string(), "na?ve");
    }

    #[test]
    fn test_string_length_beyond_data_is_rejected() {
        let mut buf = WireBuffer::with_capacity(16);
        buf.write::<u32>(1000);
        buf.write_bytes(b"abc");
        rewind(&mut buf);
        assert_eq!(buf.read_utf8_string(), "");
    }

    #[test]
    fn test_bits_pack_lsb_first() {
        let mut buf = WireBuffer::with_capacity(8);
        for bit in [true, false, true, true, false, false, false, false, true] {
            buf.write_bit(bit);
        }
        buf.align_bits();
        buf.write::<u8>(0xAA);
        assert_eq!(buf.as_slice(), &[0b0000_1101, 0b0000_0001, 0xAA]);

        rewind(&mut buf);
        let read: Vec<bool> = (0..9).map(|_| buf.read_bit()).collect();
        assert_eq!(
            read,
            vec![true, false, true, true, false, false, false, false, true]
        );
        buf.align_bits();
        assert_eq!(buf.read::<u8>(), 0xAA);
    }

    #[test]
    fn test_vector_quantization_error_bound() {
        let original = Vec3::new(100.05, -200.0, 0.0);
        let mut buf = WireBuffer::with_capacity(16);
        buf.write_vector(original);
        assert_eq!(buf.len(), 6);
        rewind(&mut buf);
        let decoded = buf.read_vector();
        assert!((decoded.x - original.x).abs() <= 0.05 + 1e-3);
        assert!((decoded.y - original.y).abs() <= 0.05 + 1e-3);
        assert!((decoded.z - original.z).abs() <= 0.05 + 1e-3);
    }

    #[test]
    fn test_vector_quantization_saturates() {
        let mut buf = WireBuffer::with_capacity(16);
        buf.write_vector(Vec3::new(1.0e9, -1.0e9, f32::NAN));
        rewind(&mut buf);
        assert_eq!(buf.read::<i16>(), i16::MAX);
        assert_eq!(buf.read::<i16>(), i16::MIN);
        assert_eq!(buf.read::<i16>(), 0);
    }

    #[test]
    fn test_rotator_and_full_vector() {
        let mut buf = WireBuffer::with_capacity(32);
        buf.write_rotator(Rotator::new(10.0, -90.0, 179.9));
        buf.write_vector_full(Vec3::new(12345.4, -7.6, 0.0));
        rewind(&mut buf);
        let rot = buf.read_rotator();
        assert!((rot.yaw + 90.0).abs() < 1e-3);
        assert!((rot.roll - 179.9).abs() < 0.05 + 1e-3);
        assert_eq!(buf.read_vector_full(), Vec3::new(12345.0, -7.0, 0.0));
    }

    #[test]
    fn test_sign_and_verify() {
        let mut buf = WireBuffer::with_capacity(32);
        buf.write::<u8>(4);
        buf.write::<u32>(77);
        let expected = crc32c::compute(buf.as_slice());
        buf.write_sign();
        assert_eq!(buf.len(), 9);
        assert_eq!(buf.read_sign(), expected);

        let mut received = WireBuffer::from_slice(buf.as_slice());
        assert!(received.verify_sign().is_ok());
        assert_eq!(received.len(), 5);
        assert_eq!(received.read::<u8>(), 4);
        assert_eq!(received.read::<u32>(), 77);
        assert_eq!(received.read::<u32>(), 0);
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let mut buf = WireBuffer::with_capacity(16);
        buf.write_bytes(b"payload");
        buf.write_sign();
        let mut bytes = buf.to_vec();
        bytes[2] ^= 0x01;
        let mut received = WireBuffer::from_slice(&bytes);
        assert!(matches!(
            received.verify_sign(),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
        assert_eq!(received.len(), bytes.len());
    }

    #[test]
    fn test_hash_and_hex() {
        let buf = WireBuffer::from_slice(&[0x01, 0xAB]);
        assert_eq!(buf.to_hex(), "01AB");
        assert_eq!(buf.hash_fast(), 33 + 0xAB);
        assert_eq!(WireBuffer::new().hash_fast(), 0);
    }

    #[test]
    fn test_set_position_clamps() {
        let mut buf = WireBuffer::with_capacity(4);
        buf.set_position(100);
        assert_eq!(buf.position(), 4);
    }

    #[test]
    fn test_load_truncates_and_resets() {
        let mut buf = WireBuffer::with_capacity(4);
        buf.write::<u8>(1);
        buf.load(&[5, 6, 7, 8, 9]);
        assert_eq!(buf.as_slice(), &[5, 6, 7, 8]);
        assert_eq!(buf.position(), 0);
    }
}
