//! Row-oriented ingestion and query records, and the columnar [`Tablet`] batch.

use crate::column::ColumnData;
use crate::error::{Result, TsFileError};
use crate::schema::MeasurementSchema;
use crate::types::{Timestamp, Value};
use bitvec::prelude::*;
use std::fmt;

/// One measurement value of a [`TsRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Measurement name.
    pub measurement: String,
    /// Value, which must match the measurement's type.
    pub value: Value,
}

/// Point-at-a-time ingestion: one device, one timestamp, several measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct TsRecord {
    /// Device identifier.
    pub device_id: String,
    /// Timestamp shared by all fields.
    pub timestamp: Timestamp,
    /// Measurement values.
    pub fields: Vec<Field>,
}

impl TsRecord {
    /// Creates a record with no fields.
    pub fn new(device_id: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            fields: Vec::new(),
        }
    }

    /// Adds a field (builder style).
    pub fn with_field(mut self, measurement: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_field(measurement, value);
        self
    }

    /// Adds a field.
    pub fn add_field(&mut self, measurement: impl Into<String>, value: impl Into<Value>) {
        self.fields.push(Field {
            measurement: measurement.into(),
            value: value.into(),
        });
    }
}

/// One row of query output. `fields` follows the order of the queried paths;
/// `None` marks a path with no value at this timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    /// Row timestamp.
    pub timestamp: Timestamp,
    /// Values per queried path.
    pub fields: Vec<Option<Value>>,
}

impl RowRecord {
    /// Creates a row.
    pub fn new(timestamp: Timestamp, fields: Vec<Option<Value>>) -> Self {
        Self { timestamp, fields }
    }

    /// Value of the `i`-th queried path.
    pub fn get(&self, i: usize) -> Option<&Value> {
        self.fields.get(i).and_then(Option::as_ref)
    }

    /// Returns true if the `i`-th queried path has no value in this row.
    pub fn is_null(&self, i: usize) -> bool {
        self.get(i).is_none()
    }
}

impl fmt::Display for RowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp)?;
        for field in &self.fields {
            match field {
                Some(v) => write!(f, "\t{}", v)?,
                None => f.write_str("\tnull")?,
            }
        }
        Ok(())
    }
}

/// A pre-allocated columnar batch for one device.
///
/// Rows are addressed by position. A value is present only once written, and
/// every row below [`row_count`](Self::row_count) needs a timestamp before the
/// tablet is handed to a writer. [`reset`](Self::reset) clears the batch for
/// reuse without reallocating.
#[derive(Debug, Clone)]
pub struct Tablet {
    device_id: String,
    schemas: Vec<MeasurementSchema>,
    max_rows: usize,
    timestamps: Vec<Timestamp>,
    has_timestamp: BitVec<u8, Msb0>,
    columns: Vec<ColumnData>,
    present: Vec<BitVec<u8, Msb0>>,
    row_count: usize,
}

impl Tablet {
    /// Allocates a batch of `max_rows` rows for the given measurements.
    pub fn new(device_id: impl Into<String>, schemas: Vec<MeasurementSchema>, max_rows: usize) -> Self {
        let columns = schemas
            .iter()
            .map(|s| ColumnData::filled(s.data_type, max_rows))
            .collect();
        let present = schemas.iter().map(|_| bitvec![u8, Msb0; 0; max_rows]).collect();
        Self {
            device_id: device_id.into(),
            schemas,
            max_rows,
            timestamps: vec![0; max_rows],
            has_timestamp: bitvec![u8, Msb0; 0; max_rows],
            columns,
            present,
            row_count: 0,
        }
    }

    /// Device the batch belongs to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Column descriptors in column order.
    pub fn schemas(&self) -> &[MeasurementSchema] {
        &self.schemas
    }

    /// Capacity in rows.
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// One past the highest row written.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Position of a measurement column.
    pub fn column_index(&self, measurement: &str) -> Option<usize> {
        self.schemas.iter().position(|s| s.name == measurement)
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.max_rows {
            return Err(TsFileError::OutOfBounds {
                index: row,
                len: self.max_rows,
            });
        }
        Ok(())
    }

    /// Sets the timestamp of a row.
    pub fn add_timestamp(&mut self, row: usize, timestamp: Timestamp) -> Result<()> {
        self.check_row(row)?;
        self.timestamps[row] = timestamp;
        self.has_timestamp.set(row, true);
        self.row_count = self.row_count.max(row + 1);
        Ok(())
    }

    /// Writes a value; it must have the column's type.
    pub fn add_value(&mut self, row: usize, column: usize, value: impl Into<Value>) -> Result<()> {
        self.check_row(row)?;
        let len = self.columns.len();
        let target = self
            .columns
            .get_mut(column)
            .ok_or(TsFileError::OutOfBounds { index: column, len })?;
        target.set_value(row, &value.into())?;
        self.present[column].set(row, true);
        self.row_count = self.row_count.max(row + 1);
        Ok(())
    }

    /// Writes a value to the named measurement column.
    pub fn add_value_by_name(&mut self, row: usize, measurement: &str, value: impl Into<Value>) -> Result<()> {
        let column = self
            .column_index(measurement)
            .ok_or_else(|| TsFileError::UnknownMeasurement {
                device: self.device_id.clone(),
                measurement: measurement.to_string(),
            })?;
        self.add_value(row, column, value)
    }

    /// Timestamp of a row, if set.
    pub fn timestamp(&self, row: usize) -> Option<Timestamp> {
        if row < self.max_rows && self.has_timestamp[row] {
            Some(self.timestamps[row])
        } else {
            None
        }
    }

    /// Returns true if the cell holds no value.
    pub fn is_null(&self, row: usize, column: usize) -> bool {
        self.present
            .get(column)
            .and_then(|bits| bits.get(row).map(|b| !*b))
            .unwrap_or(true)
    }

    /// Value of a cell, `None` if null.
    pub fn value(&self, row: usize, column: usize) -> Option<Value> {
        if self.is_null(row, column) {
            return None;
        }
        self.columns.get(column)?.get_value(row)
    }

    /// Clears every row for reuse.
    pub fn reset(&mut self) {
        self.has_timestamp.fill(false);
        for bits in &mut self.present {
            bits.fill(false);
        }
        self.row_count = 0;
    }

    /// Checks that every written row has a timestamp and that timestamps do
    /// not decrease.
    pub(crate) fn validate_rows(&self) -> Result<()> {
        let mut last: Option<Timestamp> = None;
        for row in 0..self.row_count {
            let ts = self.timestamp(row).ok_or(TsFileError::MissingTimestamp(row))?;
            if let Some(prev) = last {
                if ts < prev {
                    return Err(TsFileError::OutOfOrderTimestamp {
                        series: self.device_id.clone(),
                        timestamp: ts,
                        last: prev,
                    });
                }
            }
            last = Some(ts);
        }
        Ok(())
    }
}
