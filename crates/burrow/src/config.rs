//! Writer tuning.

use crate::types::{CompressionType, TSEncoding};

/// Default maximum number of points per page.
pub const DEFAULT_MAX_POINTS_PER_PAGE: usize = 1024;

/// Default chunk-group flush threshold (128 MiB).
pub const DEFAULT_GROUP_SIZE_THRESHOLD: usize = 128 * 1024 * 1024;

/// Tunables for a [`TsFileWriter`](crate::tsfile::TsFileWriter).
///
/// These affect flush cadence and the time-column codec only; they never change
/// what a reader sees.
#[derive(Debug, Clone, PartialEq)]
pub struct TsFileConfig {
    /// A page is sealed once it holds this many points.
    pub max_points_per_page: usize,
    /// A device's chunk group is flushed once its estimated size reaches this
    /// many bytes.
    pub group_size_threshold: usize,
    /// Encoding of every time column.
    pub time_encoding: TSEncoding,
    /// Compression of every time column.
    pub time_compression: CompressionType,
}

impl Default for TsFileConfig {
    fn default() -> Self {
        Self {
            max_points_per_page: DEFAULT_MAX_POINTS_PER_PAGE,
            group_size_threshold: DEFAULT_GROUP_SIZE_THRESHOLD,
            time_encoding: TSEncoding::Ts2Diff,
            time_compression: CompressionType::Lz4,
        }
    }
}

impl TsFileConfig {
    /// Sets the page point limit. Zero is treated as one.
    pub fn with_max_points_per_page(mut self, points: usize) -> Self {
        self.max_points_per_page = points.max(1);
        self
    }

    /// Sets the chunk-group flush threshold in bytes.
    pub fn with_group_size_threshold(mut self, bytes: usize) -> Self {
        self.group_size_threshold = bytes;
        self
    }

    /// Sets the time column encoding.
    pub fn with_time_encoding(mut self, encoding: TSEncoding) -> Self {
        self.time_encoding = encoding;
        self
    }

    /// Sets the time column compression.
    pub fn with_time_compression(mut self, compression: CompressionType) -> Self {
        self.time_compression = compression;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TsFileConfig::default();
        assert_eq!(config.max_points_per_page, 1024);
        assert_eq!(config.group_size_threshold, 128 * 1024 * 1024);
        assert_eq!(config.time_encoding, TSEncoding::Ts2Diff);
        assert_eq!(config.time_compression, CompressionType::Lz4);
    }

    #[test]
    fn test_zero_page_size_clamped() {
        let config = TsFileConfig::default().with_max_points_per_page(0);
        assert_eq!(config.max_points_per_page, 1);
    }
}
