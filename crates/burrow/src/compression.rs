//! Byte-block compressors applied to each encoded stream of a page.

use crate::error::{Result, TsFileError};
use crate::types::CompressionType;

/// Zstandard level used for page streams.
pub const ZSTD_COMPRESSION_LEVEL: i32 = 3;

/// A byte-block compression scheme.
pub trait Compressor: Send + Sync {
    /// Scheme identifier written to disk.
    fn compression_type(&self) -> CompressionType;

    /// Compresses a whole block.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses a block that must expand to exactly `expected_len` bytes.
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// Identity scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompressor;

/// LZ4 block compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

/// Zstandard compression.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Creates a compressor at the given level.
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self {
            level: ZSTD_COMPRESSION_LEVEL,
        }
    }
}

fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(TsFileError::DecompressionError(format!(
            "expanded to {} bytes, header declares {}",
            actual, expected
        )));
    }
    Ok(())
}

impl Compressor for NoCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Uncompressed
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        check_len(input.len(), expected_len)?;
        Ok(input.to_vec())
    }
}

impl Compressor for Lz4Compressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Lz4
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(input))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let output = lz4_flex::block::decompress(input, expected_len)
            .map_err(|e| TsFileError::DecompressionError(format!("LZ4: {}", e)))?;
        check_len(output.len(), expected_len)?;
        Ok(output)
    }
}

impl Compressor for ZstdCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Zstd
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(input, self.level)
            .map_err(|e| TsFileError::CompressionError(format!("Zstd: {}", e)))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let output = zstd::bulk::decompress(input, expected_len)
            .map_err(|e| TsFileError::DecompressionError(format!("Zstd: {}", e)))?;
        check_len(output.len(), expected_len)?;
        Ok(output)
    }
}

static NONE: NoCompressor = NoCompressor;
static LZ4: Lz4Compressor = Lz4Compressor;
static ZSTD: ZstdCompressor = ZstdCompressor {
    level: ZSTD_COMPRESSION_LEVEL,
};

/// Returns the compressor for a scheme, or `UnsupportedCompression` for
/// recognized schemes without an implementation.
pub fn compressor_for(compression: CompressionType) -> Result<&'static dyn Compressor> {
    match compression {
        CompressionType::Uncompressed => Ok(&NONE),
        CompressionType::Lz4 => Ok(&LZ4),
        CompressionType::Zstd => Ok(&ZSTD),
        other => Err(TsFileError::UnsupportedCompression(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..4096u32).flat_map(|i| (i % 17).to_le_bytes()).collect()
    }

    #[test]
    fn test_available_schemes_roundtrip() {
        let input = sample();
        for scheme in [
            CompressionType::Uncompressed,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ] {
            let compressor = compressor_for(scheme).unwrap();
            assert_eq!(compressor.compression_type(), scheme);
            let compressed = compressor.compress(&input).unwrap();
            if scheme != CompressionType::Uncompressed {
                assert!(compressed.len() < input.len());
            }
            assert_eq!(compressor.decompress(&compressed, input.len()).unwrap(), input);
        }
    }

    #[test]
    fn test_zstd_levels_interoperate() {
        let input = sample();
        let compressed = ZstdCompressor::new(19).compress(&input).unwrap();
        let output = ZstdCompressor::default()
            .decompress(&compressed, input.len())
            .unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_empty_block() {
        for scheme in [CompressionType::Uncompressed, CompressionType::Lz4] {
            let compressor = compressor_for(scheme).unwrap();
            let compressed = compressor.compress(&[]).unwrap();
            assert!(compressor.decompress(&compressed, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_length_mismatch_detected() {
        let input = sample();
        for scheme in [CompressionType::Uncompressed, CompressionType::Lz4] {
            let compressor = compressor_for(scheme).unwrap();
            let compressed = compressor.compress(&input).unwrap();
            assert!(compressor.decompress(&compressed, input.len() - 1).is_err());
        }
    }

    #[test]
    fn test_reserved_schemes_unsupported() {
        assert!(matches!(
            compressor_for(CompressionType::Snappy),
            Err(TsFileError::UnsupportedCompression(CompressionType::Snappy))
        ));
        assert!(compressor_for(CompressionType::Gzip).is_err());
    }
}
