//! Logical types, encoding and compression identifiers, and series paths.

use std::fmt;

/// Timestamp type (milliseconds or nanoseconds since epoch, caller-defined).
pub type Timestamp = i64;

/// Logical data type of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TSDataType {
    /// Boolean values.
    Boolean = 0,
    /// 32-bit signed integers.
    Int32 = 1,
    /// 64-bit signed integers.
    Int64 = 2,
    /// 32-bit IEEE 754 floats.
    Float = 3,
    /// 64-bit IEEE 754 floats.
    Double = 4,
    /// UTF-8 text.
    Text = 5,
}

impl TSDataType {
    /// Creates a TSDataType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Boolean),
            1 => Some(Self::Int32),
            2 => Some(Self::Int64),
            3 => Some(Self::Float),
            4 => Some(Self::Double),
            5 => Some(Self::Text),
            _ => None,
        }
    }

    /// Returns true for the four numeric types.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Float | Self::Double)
    }

    /// Returns true for float and double.
    pub fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Width of a plain-encoded value in bytes, `None` for text.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            Self::Int32 | Self::Float => Some(4),
            Self::Int64 | Self::Double => Some(8),
            Self::Text => None,
        }
    }
}

impl fmt::Display for TSDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Text => "TEXT",
        };
        f.write_str(name)
    }
}

/// Value encoding applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TSEncoding {
    /// Raw little-endian values; text is length-prefixed.
    #[default]
    Plain = 0,
    /// Dictionary of distinct strings plus per-row indices.
    Dictionary = 1,
    /// Run-length encoding.
    Rle = 2,
    /// Delta-of-delta integer encoding.
    Ts2Diff = 4,
    /// XOR-of-previous-value bit packing.
    Gorilla = 8,
}

impl TSEncoding {
    /// Creates a TSEncoding from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Plain),
            1 => Some(Self::Dictionary),
            2 => Some(Self::Rle),
            4 => Some(Self::Ts2Diff),
            8 => Some(Self::Gorilla),
            _ => None,
        }
    }

    /// Returns true if this encoding is defined for the data type.
    ///
    /// Supported does not mean lossless: Rle and Ts2Diff store FLOAT and
    /// DOUBLE values as integers scaled by `10^max_point_number`, so digits
    /// past `max_point_number` (2 by default) are rounded away. Every other
    /// supported combination is exact. See [`is_lossy`](Self::is_lossy).
    pub fn supports(self, data_type: TSDataType) -> bool {
        use TSDataType::*;
        match self {
            Self::Plain => true,
            Self::Dictionary => data_type == Text,
            Self::Rle => true,
            Self::Ts2Diff => matches!(data_type, Int32 | Int64 | Float | Double),
            Self::Gorilla => matches!(data_type, Int32 | Int64 | Float | Double),
        }
    }

    /// Returns true if values of `data_type` are rounded to
    /// `max_point_number` decimals under this encoding.
    pub fn is_lossy(self, data_type: TSDataType) -> bool {
        matches!(self, Self::Rle | Self::Ts2Diff)
            && matches!(data_type, TSDataType::Float | TSDataType::Double)
    }
}

/// Byte-block compression applied to each encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    #[default]
    Uncompressed = 0,
    /// Snappy (identifier reserved, not available).
    Snappy = 1,
    /// Gzip (identifier reserved, not available).
    Gzip = 2,
    /// LZ4 block compression.
    Lz4 = 7,
    /// Zstandard.
    Zstd = 8,
}

impl CompressionType {
    /// Creates a CompressionType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Uncompressed),
            1 => Some(Self::Snappy),
            2 => Some(Self::Gzip),
            7 => Some(Self::Lz4),
            8 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Returns true if a compressor is available for this scheme.
    pub fn is_available(self) -> bool {
        matches!(self, Self::Uncompressed | Self::Lz4 | Self::Zstd)
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer value.
    Int32(i32),
    /// 64-bit integer value.
    Int64(i64),
    /// 32-bit float value.
    Float(f32),
    /// 64-bit float value.
    Double(f64),
    /// Text value.
    Text(String),
}

impl Value {
    /// Returns the logical type of the value.
    pub fn data_type(&self) -> TSDataType {
        match self {
            Self::Boolean(_) => TSDataType::Boolean,
            Self::Int32(_) => TSDataType::Int32,
            Self::Int64(_) => TSDataType::Int64,
            Self::Float(_) => TSDataType::Float,
            Self::Double(_) => TSDataType::Double,
            Self::Text(_) => TSDataType::Text,
        }
    }

    /// Returns the value as an `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int32(v) => Some(v as f64),
            Self::Int64(v) => Some(v as f64),
            Self::Float(v) => Some(v as f64),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value as an `i64` if it is numeric. Floats truncate toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int32(v) => Some(v as i64),
            Self::Int64(v) => Some(v),
            Self::Float(v) => Some(v as i64),
            Self::Double(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Returns the boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the text payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// An inclusive time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive).
    pub start: Timestamp,
    /// End timestamp (inclusive).
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a new time range.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// The range covering every timestamp.
    pub fn all() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    /// Returns true if the timestamp falls within the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Returns true if `[start, end]` intersects this range.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        start <= self.end && end >= self.start
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// A `device.measurement` selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    /// Device identifier.
    pub device: String,
    /// Measurement name.
    pub measurement: String,
}

impl Path {
    /// Creates a path from its parts.
    pub fn new(device: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            measurement: measurement.into(),
        }
    }

    /// Parses `device.measurement`, splitting at the last dot.
    ///
    /// Returns `None` when there is no dot or either side is empty.
    pub fn parse(full: &str) -> Option<Self> {
        let (device, measurement) = full.rsplit_once('.')?;
        if device.is_empty() || measurement.is_empty() {
            return None;
        }
        Some(Self::new(device, measurement))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.measurement)
    }
}
