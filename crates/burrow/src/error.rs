//! Error and Result types for Burrow file operations.

use crate::types::{CompressionType, TSDataType, TSEncoding};
use std::io;
use thiserror::Error;

/// A convenience `Result` type for Burrow operations.
pub type Result<T> = std::result::Result<T, TsFileError>;

/// The error type for reading and writing Burrow files.
#[derive(Debug, Error)]
pub enum TsFileError {
    /// A measurement was registered twice with incompatible descriptors,
    /// or a device was registered with a conflicting alignment.
    #[error("Schema conflict on {device}.{measurement}: {reason}")]
    SchemaConflict {
        /// Device identifier.
        device: String,
        /// Measurement name.
        measurement: String,
        /// What differs from the existing registration.
        reason: String,
    },

    /// Data was written for a device that has no registered measurements.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Data was written for a measurement that is not registered on its device.
    #[error("Unknown measurement: {device}.{measurement}")]
    UnknownMeasurement {
        /// Device identifier.
        device: String,
        /// Measurement name.
        measurement: String,
    },

    /// The encoding is not defined for the data type.
    #[error("Encoding {encoding:?} does not support data type {data_type}")]
    UnsupportedEncoding {
        /// Logical type of the column.
        data_type: TSDataType,
        /// Requested encoding.
        encoding: TSEncoding,
    },

    /// The compression scheme is recognized but not available in this build.
    #[error("Unsupported compression: {0:?}")]
    UnsupportedCompression(CompressionType),

    /// An ingestion call was made after the writer was closed.
    #[error("Writer is closed")]
    WriterClosed,

    /// Leading or trailing magic bytes are missing or wrong.
    #[error("Invalid magic bytes: expected \"TsFile\", got {0:?}")]
    InvalidMagic(Vec<u8>),

    /// Unsupported file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// The footer could not be located or parsed.
    #[error("Corrupt footer: {0}")]
    CorruptFooter(String),

    /// Stored checksum does not match the computed one.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// Encoded bytes do not match what their declared encoding produces.
    #[error("Codec mismatch: {0}")]
    CodecMismatch(String),

    /// A buffer ended before the expected number of bytes could be read.
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes requested.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// Unknown encoding identifier on disk.
    #[error("Unknown encoding id: {0}")]
    UnknownEncodingId(u8),

    /// Unknown compression identifier on disk.
    #[error("Unknown compression id: {0}")]
    UnknownCompressionId(u8),

    /// Unknown data type identifier on disk.
    #[error("Unknown data type id: {0}")]
    UnknownDataTypeId(u8),

    /// Error during compression.
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Error during decompression.
    #[error("Decompression error: {0}")]
    DecompressionError(String),

    /// Time and value columns of a page disagree in length, or the columns
    /// of an aligned vector are ragged.
    #[error("Column alignment error: expected {expected} values, got {actual}")]
    ColumnAlignment {
        /// Expected number of values.
        expected: usize,
        /// Number of values found.
        actual: usize,
    },

    /// A value does not match the logical type of its column.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column type.
        expected: TSDataType,
        /// Type of the offending value.
        actual: TSDataType,
    },

    /// Timestamps went backwards for a measurement.
    #[error("Out of order timestamp for {series}: {timestamp} after {last}")]
    OutOfOrderTimestamp {
        /// Series path.
        series: String,
        /// Offending timestamp.
        timestamp: i64,
        /// Last accepted timestamp.
        last: i64,
    },

    /// A row or column index is outside the batch.
    #[error("Index out of bounds: {index} (len {len})")]
    OutOfBounds {
        /// Requested index.
        index: usize,
        /// Length of the indexed dimension.
        len: usize,
    },

    /// A row of a batch holds values but no timestamp.
    #[error("Row {0} has no timestamp")]
    MissingTimestamp(usize),

    /// A text value exceeds the measurement's `max_string_length`.
    #[error("Value of {len} bytes exceeds max string length {max}")]
    ValueTooLong {
        /// Length of the value in bytes.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// An encoder parameter could not be parsed.
    #[error("Invalid encoder parameter {key}={value}")]
    InvalidParameter {
        /// Parameter name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TsFileError {
    /// Returns true if the error means the file is not a valid, cleanly
    /// closed Burrow file.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::CorruptFooter(_)
                | Self::ChecksumMismatch { .. }
        )
    }

    /// Returns true if the error comes from decoding column payloads.
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Self::CodecMismatch(_)
                | Self::Truncated { .. }
                | Self::UnknownEncodingId(_)
                | Self::UnknownCompressionId(_)
                | Self::UnknownDataTypeId(_)
                | Self::DecompressionError(_)
        )
    }
}
