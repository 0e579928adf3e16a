//! MSB-first bit streams.

use crate::error::{Result, TsFileError};
use bitvec::prelude::*;

/// Appends bits most-significant first.
#[derive(Debug, Default)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one bit.
    pub fn write_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Appends the low `n` bits of `value`, high bit first.
    pub fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Number of bits written.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Pads to a byte boundary with zeros and returns the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bits.into_vec()
    }
}

/// Reads bits most-significant first, failing at end of input.
pub struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Starts reading at the first bit of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bits: bytes.view_bits::<Msb0>(),
            pos: 0,
        }
    }

    /// Bits left.
    pub fn remaining(&self) -> usize {
        self.bits.len() - self.pos
    }

    /// Reads one bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        let bit = self
            .bits
            .get(self.pos)
            .map(|b| *b)
            .ok_or(TsFileError::CodecMismatch("bit stream ended early".into()))?;
        self.pos += 1;
        Ok(bit)
    }

    /// Reads `n` bits (at most 64) into the low bits of a `u64`.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n as usize > self.remaining() {
            return Err(TsFileError::CodecMismatch(format!(
                "bit stream ended early: needed {} bits, {} left",
                n,
                self.remaining()
            )));
        }
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | u64::from(self.bits[self.pos]);
            self.pos += 1;
        }
        Ok(value)
    }

    /// Fails unless only zero padding (fewer than eight bits) remains.
    pub fn finish(self) -> Result<()> {
        let tail = &self.bits[self.pos..];
        if tail.len() >= 8 || tail.any() {
            return Err(TsFileError::CodecMismatch(format!(
                "{} unexpected trailing bits",
                tail.len()
            )));
        }
        Ok(())
    }
}
