//! Block delta encoding for integers.
//!
//! The first value is stored as a zigzag varint. The remaining successive
//! differences are grouped into blocks of [`BLOCK_SIZE`]; each block stores its
//! minimum delta, a bit width, and every `delta - min` bit-packed at that width.
//! Near-regular timestamps collapse to a width of zero or a few bits.
//!
//! All arithmetic wraps, so any `i64` sequence round-trips.

use super::bits::{BitReader, BitWriter};
use crate::error::{Result, TsFileError};
use crate::io::{put_varint, ByteReader};

/// Deltas per bit-packed block.
pub const BLOCK_SIZE: usize = 128;

/// Encodes `values`.
pub fn encode(values: &[i64], out: &mut Vec<u8>) {
    let Some((&first, _)) = values.split_first() else {
        return;
    };
    put_varint(out, first);

    let deltas: Vec<i64> = values.windows(2).map(|w| w[1].wrapping_sub(w[0])).collect();
    for block in deltas.chunks(BLOCK_SIZE) {
        let min = block.iter().copied().min().unwrap_or(0);
        let max_offset = block
            .iter()
            .map(|d| d.wrapping_sub(min) as u64)
            .max()
            .unwrap_or(0);
        let width = 64 - max_offset.leading_zeros();

        put_varint(out, min);
        out.push(width as u8);

        let mut bits = BitWriter::new();
        for d in block {
            bits.write_bits(d.wrapping_sub(min) as u64, width);
        }
        out.extend_from_slice(&bits.into_bytes());
    }
}

/// Decodes exactly `count` values.
pub fn decode(reader: &mut ByteReader<'_>, count: usize) -> Result<Vec<i64>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut values = Vec::with_capacity(count.min(BLOCK_SIZE * (reader.remaining() + 1)));
    let mut prev = reader.read_varint()?;
    values.push(prev);

    let mut remaining = count - 1;
    while remaining > 0 {
        let n = remaining.min(BLOCK_SIZE);
        let min = reader.read_varint()?;
        let width = u32::from(reader.read_u8()?);
        if width > 64 {
            return Err(TsFileError::CodecMismatch(format!(
                "delta bit width {} exceeds 64",
                width
            )));
        }
        let packed = reader.take((n * width as usize).div_ceil(8))?;
        let mut bits = BitReader::new(packed);
        for _ in 0..n {
            let offset = bits.read_bits(width)?;
            prev = prev.wrapping_add(min.wrapping_add(offset as i64));
            values.push(prev);
        }
        bits.finish()?;
        remaining -= n;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: &[i64]) -> Vec<u8> {
        let mut out = Vec::new();
        encode(values, &mut out);
        let mut reader = ByteReader::new(&out);
        assert_eq!(decode(&mut reader, values.len()).unwrap(), values);
        assert!(reader.is_empty());
        out
    }

    #[test]
    fn test_regular_interval_packs_to_zero_width() {
        let values: Vec<i64> = (0..1000).map(|i| 1_600_000_000_000 + i * 1000).collect();
        let out = roundtrip(&values);
        // First value, then per block: min delta varint + width byte.
        assert!(out.len() < 40, "encoded {} bytes", out.len());
    }

    #[test]
    fn test_irregular_and_negative() {
        roundtrip(&[-1_000_000_000, -999_999_000, 5, 5, 4, 1 << 40, -(1 << 40)]);
    }

    #[test]
    fn test_extreme_values_wrap() {
        roundtrip(&[i64::MIN, i64::MAX, 0, i64::MIN, -1, i64::MAX]);
    }

    #[test]
    fn test_single_value() {
        roundtrip(&[42]);
    }

    #[test]
    fn test_block_boundary() {
        let values: Vec<i64> = (0..(BLOCK_SIZE as i64 * 2 + 2)).map(|i| i * i).collect();
        roundtrip(&values);
    }

    #[test]
    fn test_bad_width() {
        let mut reader = ByteReader::new(&[0, 0, 65]);
        assert!(decode(&mut reader, 2).is_err());
    }
}
