//! Aggregated statistics for pages, chunks, series and devices.
//!
//! Every level records count, time range, first and last. Numeric types also
//! record min, max and sum. NaN never becomes a min or max but does propagate
//! into the sum.

use crate::column::{Column, ColumnData, ColumnValue, NumericValue};
use crate::encoding::plain::PlainValue;
use crate::error::{Result, TsFileError};
use crate::io::ByteReader;
use crate::types::{TSDataType, Timestamp, Value};
use std::cmp::Ordering;
use std::io::Write;

const HAS_ENDPOINTS: u8 = 0b001;
const HAS_RANGE: u8 = 0b010;
const HAS_SUM: u8 = 0b100;

/// Summary of the values of one column over a time span.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    /// Type of the summarized values.
    pub data_type: TSDataType,
    /// Number of values.
    pub count: u64,
    /// Earliest timestamp (`i64::MAX` when empty).
    pub start_time: Timestamp,
    /// Latest timestamp (`i64::MIN` when empty).
    pub end_time: Timestamp,
    /// Value at the earliest timestamp.
    pub first: Option<Value>,
    /// Value at the latest timestamp.
    pub last: Option<Value>,
    /// Smallest value, numeric types only.
    pub min: Option<Value>,
    /// Largest value, numeric types only.
    pub max: Option<Value>,
    /// Sum of values, numeric types only.
    pub sum: Option<f64>,
}

impl Statistics {
    /// Creates empty statistics.
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            count: 0,
            start_time: Timestamp::MAX,
            end_time: Timestamp::MIN,
            first: None,
            last: None,
            min: None,
            max: None,
            sum: None,
        }
    }

    /// Returns true if no values were recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Computes statistics over a column whose positions pair with `timestamps`.
    pub fn from_column(timestamps: &[Timestamp], column: &ColumnData) -> Result<Self> {
        if timestamps.len() != column.len() {
            return Err(TsFileError::ColumnAlignment {
                expected: timestamps.len(),
                actual: column.len(),
            });
        }
        let mut stats = Self::new(column.data_type());
        if timestamps.is_empty() {
            return Ok(stats);
        }

        stats.count = timestamps.len() as u64;
        stats.start_time = timestamps.iter().copied().min().unwrap_or(Timestamp::MAX);
        stats.end_time = timestamps.iter().copied().max().unwrap_or(Timestamp::MIN);
        stats.first = column.get_value(0);
        stats.last = column.get_value(column.len() - 1);

        match column {
            ColumnData::Int32(c) => stats.fold_numeric(c),
            ColumnData::Int64(c) => stats.fold_numeric(c),
            ColumnData::Float(c) => stats.fold_numeric(c),
            ColumnData::Double(c) => stats.fold_numeric(c),
            ColumnData::Boolean(_) | ColumnData::Text(_) => {}
        }
        Ok(stats)
    }

    fn fold_numeric<T: NumericValue>(&mut self, column: &Column<T>) {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut sum = 0.0f64;
        for &v in column.iter() {
            sum += v.to_f64();
            // NaN compares as unordered with itself.
            if v.partial_cmp(&v).is_none() {
                continue;
            }
            if min.map_or(true, |m| v < m) {
                min = Some(v);
            }
            if max.map_or(true, |m| v > m) {
                max = Some(v);
            }
        }
        self.min = min.map(ColumnValue::into_value);
        self.max = max.map(ColumnValue::into_value);
        self.sum = Some(sum);
    }

    /// Folds `other` into `self`.
    pub fn merge(&mut self, other: &Statistics) -> Result<()> {
        if other.data_type != self.data_type {
            return Err(TsFileError::TypeMismatch {
                expected: self.data_type,
                actual: other.data_type,
            });
        }
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other.clone();
            return Ok(());
        }

        if other.start_time < self.start_time {
            self.start_time = other.start_time;
            self.first = other.first.clone();
        }
        if other.end_time >= self.end_time {
            self.end_time = other.end_time;
            self.last = other.last.clone();
        }
        self.count += other.count;
        self.min = pick(self.min.take(), other.min.clone(), Ordering::Less);
        self.max = pick(self.max.take(), other.max.clone(), Ordering::Greater);
        self.sum = match (self.sum, other.sum) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        Ok(())
    }

    /// Serializes the statistics.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut flags = 0u8;
        if self.first.is_some() && self.last.is_some() {
            flags |= HAS_ENDPOINTS;
        }
        if self.min.is_some() && self.max.is_some() {
            flags |= HAS_RANGE;
        }
        if self.sum.is_some() {
            flags |= HAS_SUM;
        }

        let mut buf = Vec::with_capacity(32);
        buf.push(self.data_type as u8);
        buf.extend_from_slice(&self.count.to_le_bytes());
        buf.extend_from_slice(&self.start_time.to_le_bytes());
        buf.extend_from_slice(&self.end_time.to_le_bytes());
        buf.push(flags);
        for value in [&self.first, &self.last, &self.min, &self.max].into_iter().flatten() {
            write_value(value, self.data_type, &mut buf)?;
        }
        if let Some(sum) = self.sum {
            buf.extend_from_slice(&sum.to_le_bytes());
        }
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Parses statistics written by [`write_to`](Self::write_to).
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let raw_type = reader.read_u8()?;
        let data_type = TSDataType::from_u8(raw_type).ok_or(TsFileError::UnknownDataTypeId(raw_type))?;
        let mut stats = Self::new(data_type);
        stats.count = reader.read_u64()?;
        stats.start_time = reader.read_i64()?;
        stats.end_time = reader.read_i64()?;
        let flags = reader.read_u8()?;
        if flags & HAS_ENDPOINTS != 0 {
            stats.first = Some(read_value(data_type, reader)?);
            stats.last = Some(read_value(data_type, reader)?);
        }
        if flags & HAS_RANGE != 0 {
            stats.min = Some(read_value(data_type, reader)?);
            stats.max = Some(read_value(data_type, reader)?);
        }
        if flags & HAS_SUM != 0 {
            stats.sum = Some(reader.read_f64()?);
        }
        Ok(stats)
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int32(x), Value::Int32(y)) => x.partial_cmp(y),
        (Value::Int64(x), Value::Int64(y)) => x.partial_cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// Keeps `candidate` over `current` when it compares as `want`.
fn pick(current: Option<Value>, candidate: Option<Value>, want: Ordering) -> Option<Value> {
    match (current, candidate) {
        (Some(cur), Some(cand)) => {
            if compare(&cand, &cur) == Some(want) {
                Some(cand)
            } else {
                Some(cur)
            }
        }
        (cur, cand) => cur.or(cand),
    }
}

fn write_value(value: &Value, data_type: TSDataType, out: &mut Vec<u8>) -> Result<()> {
    if value.data_type() != data_type {
        return Err(TsFileError::TypeMismatch {
            expected: data_type,
            actual: value.data_type(),
        });
    }
    match value {
        Value::Boolean(v) => v.write_plain(out),
        Value::Int32(v) => v.write_plain(out),
        Value::Int64(v) => v.write_plain(out),
        Value::Float(v) => v.write_plain(out),
        Value::Double(v) => v.write_plain(out),
        Value::Text(v) => v.write_plain(out),
    }
    Ok(())
}

fn read_value(data_type: TSDataType, reader: &mut ByteReader<'_>) -> Result<Value> {
    Ok(match data_type {
        TSDataType::Boolean => bool::read_plain(reader)?.into_value(),
        TSDataType::Int32 => i32::read_plain(reader)?.into_value(),
        TSDataType::Int64 => i64::read_plain(reader)?.into_value(),
        TSDataType::Float => f32::read_plain(reader)?.into_value(),
        TSDataType::Double => f64::read_plain(reader)?.into_value(),
        TSDataType::Text => String::read_plain(reader)?.into_value(),
    })
}
