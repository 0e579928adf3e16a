//! Gorilla bit-level encodings.
//!
//! ## Integers (delta-of-delta)
//!
//! - First value: 64 bits raw
//! - Subsequent values by delta-of-delta:
//!   - `0`: `'0'` (1 bit)
//!   - `[-63, 64]`: `'10'` + 7 bits
//!   - `[-255, 256]`: `'110'` + 9 bits
//!   - `[-2047, 2048]`: `'1110'` + 12 bits
//!   - else: `'1111'` + 64 bits
//!
//! ## Floats (XOR)
//!
//! - First value: raw IEEE 754 bits (32 or 64)
//! - Subsequent values, XOR with the previous value:
//!   - XOR = 0: `'0'` (1 bit)
//!   - Fits the previous window: `'10'` + meaningful bits
//!   - New window: `'11'` + 5 bits leading + 6 bits length + meaningful bits
//!
//! Floats are stored by bit pattern, so NaN payloads and signed zeros survive.

use super::bits::{BitReader, BitWriter};
use crate::error::{Result, TsFileError};
use std::marker::PhantomData;

/// Largest leading-zero count the 5-bit field can hold.
const MAX_LEADING: u32 = 31;

/// Encodes integers with delta-of-delta.
pub fn encode_integers(values: &[i64]) -> Vec<u8> {
    let mut output = BitWriter::new();
    let mut encoder = IntegerEncoder::new();
    for &v in values {
        encoder.encode(v, &mut output);
    }
    output.into_bytes()
}

/// Decodes exactly `count` delta-of-delta integers; `bytes` must hold nothing else.
pub fn decode_integers(bytes: &[u8], count: usize) -> Result<Vec<i64>> {
    let mut reader = BitReader::new(bytes);
    let mut decoder = IntegerDecoder::new();
    let mut values = Vec::with_capacity(count.min(bytes.len() * 8));
    for _ in 0..count {
        values.push(decoder.decode_next(&mut reader)?);
    }
    reader.finish()?;
    Ok(values)
}

/// Encodes floats with XOR compression.
pub fn encode_floats<T: FloatBits>(values: &[T]) -> Vec<u8> {
    let mut output = BitWriter::new();
    let mut encoder = XorEncoder::<T>::new();
    for &v in values {
        encoder.encode(v, &mut output);
    }
    output.into_bytes()
}

/// Decodes exactly `count` XOR-compressed floats; `bytes` must hold nothing else.
pub fn decode_floats<T: FloatBits>(bytes: &[u8], count: usize) -> Result<Vec<T>> {
    let mut reader = BitReader::new(bytes);
    let mut decoder = XorDecoder::<T>::new();
    let mut values = Vec::with_capacity(count.min(bytes.len() * 8));
    for _ in 0..count {
        values.push(decoder.decode_next(&mut reader)?);
    }
    reader.finish()?;
    Ok(values)
}

/// Encoder for integers using delta-of-delta encoding.
#[derive(Debug, Default)]
pub struct IntegerEncoder {
    started: bool,
    prev: i64,
    prev_delta: i64,
}

impl IntegerEncoder {
    /// Creates a new integer encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a value into the output bit stream.
    pub fn encode(&mut self, value: i64, output: &mut BitWriter) {
        if !self.started {
            self.started = true;
            self.prev = value;
            self.prev_delta = 0;
            output.write_bits(value as u64, 64);
            return;
        }

        let delta = value.wrapping_sub(self.prev);
        let dod = delta.wrapping_sub(self.prev_delta);

        if dod == 0 {
            output.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            output.write_bits(0b10, 2);
            output.write_bits((dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            output.write_bits(0b110, 3);
            output.write_bits((dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            output.write_bits(0b1110, 4);
            output.write_bits((dod + 2047) as u64, 12);
        } else {
            output.write_bits(0b1111, 4);
            output.write_bits(dod as u64, 64);
        }

        self.prev_delta = delta;
        self.prev = value;
    }
}

/// Decoder for delta-of-delta encoded integers.
#[derive(Debug, Default)]
pub struct IntegerDecoder {
    started: bool,
    prev: i64,
    prev_delta: i64,
}

impl IntegerDecoder {
    /// Creates a new integer decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next value from the bit stream.
    pub fn decode_next(&mut self, input: &mut BitReader<'_>) -> Result<i64> {
        if !self.started {
            let value = input.read_bits(64)? as i64;
            self.started = true;
            self.prev = value;
            self.prev_delta = 0;
            return Ok(value);
        }

        let dod = if !input.read_bit()? {
            0
        } else if !input.read_bit()? {
            input.read_bits(7)? as i64 - 63
        } else if !input.read_bit()? {
            input.read_bits(9)? as i64 - 255
        } else if !input.read_bit()? {
            input.read_bits(12)? as i64 - 2047
        } else {
            input.read_bits(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(dod);
        let value = self.prev.wrapping_add(delta);
        self.prev_delta = delta;
        self.prev = value;
        Ok(value)
    }
}

/// Floating-point types compressible by XOR of their bit patterns.
pub trait FloatBits: Copy {
    /// Width of the bit pattern.
    const BITS: u32;

    /// Bit pattern in the low bits of a `u64`.
    fn to_raw(self) -> u64;

    /// Rebuilds a value from its bit pattern.
    fn from_raw(bits: u64) -> Self;
}

impl FloatBits for f32 {
    const BITS: u32 = 32;

    fn to_raw(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn from_raw(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl FloatBits for f64 {
    const BITS: u32 = 64;

    fn to_raw(self) -> u64 {
        self.to_bits()
    }

    fn from_raw(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// Encoder for float values using XOR compression.
#[derive(Debug)]
pub struct XorEncoder<T> {
    prev: Option<u64>,
    window: Option<(u32, u32)>,
    _marker: PhantomData<T>,
}

impl<T: FloatBits> XorEncoder<T> {
    /// Creates a new value encoder.
    pub fn new() -> Self {
        Self {
            prev: None,
            window: None,
            _marker: PhantomData,
        }
    }

    /// Encodes a float value into the output bit stream.
    pub fn encode(&mut self, value: T, output: &mut BitWriter) {
        let bits = value.to_raw();

        let Some(prev) = self.prev else {
            self.prev = Some(bits);
            output.write_bits(bits, T::BITS);
            return;
        };

        let xor = bits ^ prev;
        if xor == 0 {
            output.write_bit(false);
        } else {
            let leading = (xor.leading_zeros() - (64 - T::BITS)).min(MAX_LEADING);
            let trailing = xor.trailing_zeros();

            match self.window {
                Some((prev_leading, prev_trailing))
                    if leading >= prev_leading && trailing >= prev_trailing =>
                {
                    output.write_bits(0b10, 2);
                    let meaningful = T::BITS - prev_leading - prev_trailing;
                    output.write_bits(xor >> prev_trailing, meaningful);
                }
                _ => {
                    output.write_bits(0b11, 2);
                    let meaningful = T::BITS - leading - trailing;
                    output.write_bits(u64::from(leading), 5);
                    output.write_bits(u64::from(meaningful - 1), 6);
                    output.write_bits(xor >> trailing, meaningful);
                    self.window = Some((leading, trailing));
                }
            }
        }

        self.prev = Some(bits);
    }
}

impl<T: FloatBits> Default for XorEncoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder for XOR-encoded float values.
#[derive(Debug)]
pub struct XorDecoder<T> {
    prev: Option<u64>,
    window: Option<(u32, u32)>,
    _marker: PhantomData<T>,
}

impl<T: FloatBits> XorDecoder<T> {
    /// Creates a new value decoder.
    pub fn new() -> Self {
        Self {
            prev: None,
            window: None,
            _marker: PhantomData,
        }
    }

    /// Decodes the next float value from the bit stream.
    pub fn decode_next(&mut self, input: &mut BitReader<'_>) -> Result<T> {
        let Some(prev) = self.prev else {
            let bits = input.read_bits(T::BITS)?;
            self.prev = Some(bits);
            return Ok(T::from_raw(bits));
        };

        let xor = if !input.read_bit()? {
            0
        } else if !input.read_bit()? {
            let (leading, trailing) = self.window.ok_or_else(|| {
                TsFileError::CodecMismatch("window reuse before any window was set".into())
            })?;
            input.read_bits(T::BITS - leading - trailing)? << trailing
        } else {
            let leading = input.read_bits(5)? as u32;
            let meaningful = input.read_bits(6)? as u32 + 1;
            if leading + meaningful > T::BITS {
                return Err(TsFileError::CodecMismatch(format!(
                    "XOR window {}+{} exceeds {} bits",
                    leading,
                    meaningful,
                    T::BITS
                )));
            }
            let trailing = T::BITS - leading - meaningful;
            self.window = Some((leading, trailing));
            input.read_bits(meaningful)? << trailing
        };

        let bits = prev ^ xor;
        self.prev = Some(bits);
        Ok(T::from_raw(bits))
    }
}

impl<T: FloatBits> Default for XorDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_integers_roundtrip(values: &[i64]) -> usize {
        let bytes = encode_integers(values);
        let decoded = decode_integers(&bytes, values.len()).expect("should decode");
        assert_eq!(decoded, values);
        bytes.len()
    }

    fn assert_floats_roundtrip<T: FloatBits + std::fmt::Debug>(values: &[T]) -> usize {
        let bytes = encode_floats(values);
        let decoded: Vec<T> = decode_floats(&bytes, values.len()).expect("should decode");
        let expected: Vec<u64> = values.iter().map(|v| v.to_raw()).collect();
        let actual: Vec<u64> = decoded.iter().map(|v| v.to_raw()).collect();
        assert_eq!(actual, expected);
        bytes.len()
    }

    #[test]
    fn test_integer_zero_delta() {
        // Constant interval: every value after the second costs one bit.
        let values = vec![1000_i64, 1010, 1020, 1030, 1040];
        let size = assert_integers_roundtrip(&values);
        assert!(size <= 11, "zero delta-of-delta should compress well");
    }

    #[test]
    fn test_integer_small_medium_large_delta() {
        // Delta-of-delta in [-63, 64]
        assert_integers_roundtrip(&[1000, 1010, 1025, 1035, 1055]);
        // Delta-of-delta in [-255, 256]
        assert_integers_roundtrip(&[1000, 1100, 1350, 1400]);
        // Delta-of-delta in [-2047, 2048]
        assert_integers_roundtrip(&[1000, 2000, 5000, 5500]);
    }

    #[test]
    fn test_integer_delta_beyond_32_bits() {
        let base = 1_000_000_000_000i64;
        assert_integers_roundtrip(&[
            base,
            base + 1_000_000_000,
            base + 2_000_000_000,
            base + 2_000_000_001,
            base + 2_100_000_000 + i32::MAX as i64 * 4,
            0,
        ]);
    }

    #[test]
    fn test_integer_extremes_wrap() {
        assert_integers_roundtrip(&[i64::MIN, i64::MAX, i64::MIN, 0, -1, i64::MAX]);
    }

    #[test]
    fn test_negative_integers() {
        assert_integers_roundtrip(&[-1_000_000_000_i64, -999_999_000, -999_998_000, 0, 1000]);
    }

    #[test]
    fn test_float_identical() {
        let size = assert_floats_roundtrip(&[42.5_f64; 10]);
        // 64 bits for the first value, then one bit each.
        assert_eq!(size, 10);
    }

    #[test]
    fn test_float_varying() {
        assert_floats_roundtrip(&[1.0_f64, 1.5, 2.0, 2.5, 3.0, 100.0, -50.0, 0.0]);
        assert_floats_roundtrip(&[1.0_f64, 1.0000001, 1.0000002, 1.0000003]);
    }

    #[test]
    fn test_float_special_values_bit_exact() {
        assert_floats_roundtrip(&[
            0.0_f64,
            -0.0,
            f64::MIN,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NAN,
            f64::from_bits(0x7FF8_0000_0000_0001),
        ]);
    }

    #[test]
    fn test_float_single_low_bit_change() {
        // Leading zeros beyond the 5-bit cap must still reconstruct exactly.
        assert_floats_roundtrip(&[
            f64::from_bits(0),
            f64::from_bits(1),
            f64::from_bits(3),
            f64::from_bits(1 << 62),
        ]);
    }

    #[test]
    fn test_f32_values() {
        assert_floats_roundtrip(&[1.5_f32, 1.5, -2.25, f32::NAN, f32::MAX, 0.1, 0.2]);
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = encode_floats(&[1.0_f64, 2.0, 3.0]);
        assert!(decode_floats::<f64>(&bytes[..bytes.len() - 2], 3).is_err());
        assert!(decode_floats::<f64>(&bytes, 4).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_integers(&[1, 2, 3]);
        bytes.push(0);
        assert!(decode_integers(&bytes, 3).is_err());
    }

    #[test]
    fn test_large_sine_dataset_compresses() {
        let values: Vec<f64> = (0..1000)
            .map(|i| 50.0 + (i as f64 * 0.1).sin() * 10.0)
            .collect();
        let timestamps: Vec<i64> = (0..1000).map(|i| 1_000_000_000 + i * 1_000_000_000).collect();

        let ts_size = assert_integers_roundtrip(&timestamps);
        let val_size = assert_floats_roundtrip(&values);
        let ratio = (1000 * 16) as f64 / (ts_size + val_size) as f64;
        assert!(ratio > 1.5, "Expected compression ratio >1.5:1, got {:.2}:1", ratio);
    }
}
