//! Positional typed columns.
//!
//! A [`Column`] is a fixed-length buffer of one logical type with
//! get/set-by-position, and a [`ColumnBuilder`] only appends. Both are generic
//! over [`ColumnValue`], so codecs and statistics are written once for every
//! type. [`ColumnData`] and [`ColumnDataBuilder`] are the tagged forms used
//! where the type is only known at runtime (from a measurement descriptor).
//!
//! Numeric columns answer reads and writes in any numeric type: widening is
//! exact, float to integer truncates toward zero.

use crate::error::{Result, TsFileError};
use crate::types::{TSDataType, Value};
use std::fmt;

/// A value that can be stored in a typed column.
pub trait ColumnValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Logical type of the column holding this value.
    const DATA_TYPE: TSDataType;

    /// Converts into the dynamically typed [`Value`].
    fn into_value(self) -> Value;

    /// Extracts from a [`Value`] of exactly this type.
    fn from_value(value: &Value) -> Option<Self>;

    /// Wraps a typed column into its tagged form.
    fn into_column_data(column: Column<Self>) -> ColumnData;

    /// Borrows the typed column out of a tagged column of this type.
    fn column_ref(data: &ColumnData) -> Option<&Column<Self>>;
}

/// Numeric column values with lossy cross-type conversion.
pub trait NumericValue: ColumnValue + Copy + PartialOrd {
    /// Reads as `i32`.
    fn to_i32(self) -> i32;
    /// Reads as `i64`.
    fn to_i64(self) -> i64;
    /// Reads as `f32`.
    fn to_f32(self) -> f32;
    /// Reads as `f64`.
    fn to_f64(self) -> f64;
    /// Converts from `i32`.
    fn from_i32(v: i32) -> Self;
    /// Converts from `i64`.
    fn from_i64(v: i64) -> Self;
    /// Converts from `f32`.
    fn from_f32(v: f32) -> Self;
    /// Converts from `f64`.
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_numeric_value {
    ($t:ty, $variant:ident) => {
        impl ColumnValue for $t {
            const DATA_TYPE: TSDataType = TSDataType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match *value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_column_data(column: Column<Self>) -> ColumnData {
                ColumnData::$variant(column)
            }

            fn column_ref(data: &ColumnData) -> Option<&Column<Self>> {
                match data {
                    ColumnData::$variant(c) => Some(c),
                    _ => None,
                }
            }
        }

        impl NumericValue for $t {
            fn to_i32(self) -> i32 {
                self as i32
            }
            fn to_i64(self) -> i64 {
                self as i64
            }
            fn to_f32(self) -> f32 {
                self as f32
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_i32(v: i32) -> Self {
                v as $t
            }
            fn from_i64(v: i64) -> Self {
                v as $t
            }
            fn from_f32(v: f32) -> Self {
                v as $t
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

impl_numeric_value!(i32, Int32);
impl_numeric_value!(i64, Int64);
impl_numeric_value!(f32, Float);
impl_numeric_value!(f64, Double);

impl ColumnValue for bool {
    const DATA_TYPE: TSDataType = TSDataType::Boolean;

    fn into_value(self) -> Value {
        Value::Boolean(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn into_column_data(column: Column<Self>) -> ColumnData {
        ColumnData::Boolean(column)
    }

    fn column_ref(data: &ColumnData) -> Option<&Column<Self>> {
        match data {
            ColumnData::Boolean(c) => Some(c),
            _ => None,
        }
    }
}

impl ColumnValue for String {
    const DATA_TYPE: TSDataType = TSDataType::Text;

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn into_column_data(column: Column<Self>) -> ColumnData {
        ColumnData::Text(column)
    }

    fn column_ref(data: &ColumnData) -> Option<&Column<Self>> {
        match data {
            ColumnData::Text(c) => Some(c),
            _ => None,
        }
    }
}

/// A fixed-length column of one logical type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Column<T> {
    values: Vec<T>,
}

impl<T: ColumnValue> Column<T> {
    /// Wraps existing values.
    pub fn new(values: Vec<T>) -> Self {
        Self { values }
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the column has no positions.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `pos`.
    pub fn get(&self, pos: usize) -> Option<&T> {
        self.values.get(pos)
    }

    /// Overwrites the value at `pos`.
    pub fn set(&mut self, pos: usize, value: T) -> Result<()> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(pos)
            .ok_or(TsFileError::OutOfBounds { index: pos, len })?;
        *slot = value;
        Ok(())
    }

    /// Borrows all values.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Consumes the column, returning its values.
    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    /// Iterates over the values in position order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }
}

impl<T: ColumnValue + Default> Column<T> {
    /// Creates a column of `len` default values.
    pub fn filled(len: usize) -> Self {
        Self {
            values: vec![T::default(); len],
        }
    }
}

/// Append-only builder producing an immutable [`Column`].
#[derive(Debug, Clone, Default)]
pub struct ColumnBuilder<T> {
    values: Vec<T>,
}

impl<T: ColumnValue> ColumnBuilder<T> {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Creates an empty builder with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    /// Appends a value.
    pub fn append(&mut self, value: T) {
        self.values.push(value);
    }

    /// Number of appended values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrows the appended values.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Finishes the builder.
    pub fn build(self) -> Column<T> {
        Column::new(self.values)
    }
}

fn set_from_value<T: ColumnValue>(column: &mut Column<T>, pos: usize, value: &Value) -> Result<()> {
    let typed = T::from_value(value).ok_or(TsFileError::TypeMismatch {
        expected: T::DATA_TYPE,
        actual: value.data_type(),
    })?;
    column.set(pos, typed)
}

fn append_from_value<T: ColumnValue>(builder: &mut ColumnBuilder<T>, value: &Value) -> Result<()> {
    let typed = T::from_value(value).ok_or(TsFileError::TypeMismatch {
        expected: T::DATA_TYPE,
        actual: value.data_type(),
    })?;
    builder.append(typed);
    Ok(())
}

macro_rules! with_column {
    ($data:expr, $enum:ident, $col:ident => $body:expr) => {
        match $data {
            $enum::Boolean($col) => $body,
            $enum::Int32($col) => $body,
            $enum::Int64($col) => $body,
            $enum::Float($col) => $body,
            $enum::Double($col) => $body,
            $enum::Text($col) => $body,
        }
    };
}

pub(crate) use with_column;

macro_rules! numeric_read {
    ($data:expr, $pos:expr, $conv:ident, $target:ident) => {
        match $data {
            ColumnData::Int32(c) => c.get($pos).map(|v| v.$conv()),
            ColumnData::Int64(c) => c.get($pos).map(|v| v.$conv()),
            ColumnData::Float(c) => c.get($pos).map(|v| v.$conv()),
            ColumnData::Double(c) => c.get($pos).map(|v| v.$conv()),
            other => {
                return Err(TsFileError::TypeMismatch {
                    expected: TSDataType::$target,
                    actual: other.data_type(),
                })
            }
        }
        .ok_or(TsFileError::OutOfBounds {
            index: $pos,
            len: $data.len(),
        })
    };
}

macro_rules! numeric_write {
    ($builder:expr, $value:expr, $conv:ident, $source:ident) => {
        match $builder {
            ColumnDataBuilder::Int32(b) => b.append(i32::$conv($value)),
            ColumnDataBuilder::Int64(b) => b.append(i64::$conv($value)),
            ColumnDataBuilder::Float(b) => b.append(f32::$conv($value)),
            ColumnDataBuilder::Double(b) => b.append(f64::$conv($value)),
            other => {
                return Err(TsFileError::TypeMismatch {
                    expected: other.data_type(),
                    actual: TSDataType::$source,
                })
            }
        }
    };
}

/// A column whose logical type is known at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Boolean column.
    Boolean(Column<bool>),
    /// 32-bit integer column.
    Int32(Column<i32>),
    /// 64-bit integer column.
    Int64(Column<i64>),
    /// 32-bit float column.
    Float(Column<f32>),
    /// 64-bit float column.
    Double(Column<f64>),
    /// Text column.
    Text(Column<String>),
}

impl ColumnData {
    /// Creates a column of `len` default values of the given type.
    pub fn filled(data_type: TSDataType, len: usize) -> Self {
        match data_type {
            TSDataType::Boolean => Self::Boolean(Column::filled(len)),
            TSDataType::Int32 => Self::Int32(Column::filled(len)),
            TSDataType::Int64 => Self::Int64(Column::filled(len)),
            TSDataType::Float => Self::Float(Column::filled(len)),
            TSDataType::Double => Self::Double(Column::filled(len)),
            TSDataType::Text => Self::Text(Column::filled(len)),
        }
    }

    /// Logical type of the column.
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

    /// Number of positions.
    pub fn len(&self) -> usize {
        with_column!(self, ColumnData, c => c.len())
    }

    /// Returns true if the column has no positions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at `pos` as a [`Value`].
    pub fn get_value(&self, pos: usize) -> Option<Value> {
        with_column!(self, ColumnData, c => c.get(pos).cloned().map(ColumnValue::into_value))
    }

    /// Overwrites the value at `pos`; the value must have the column's type.
    pub fn set_value(&mut self, pos: usize, value: &Value) -> Result<()> {
        with_column!(self, ColumnData, c => set_from_value(c, pos, value))
    }

    /// Reads a numeric position as `i32`.
    pub fn get_i32(&self, pos: usize) -> Result<i32> {
        numeric_read!(self, pos, to_i32, Int32)
    }

    /// Reads a numeric position as `i64`.
    pub fn get_i64(&self, pos: usize) -> Result<i64> {
        numeric_read!(self, pos, to_i64, Int64)
    }

    /// Reads a numeric position as `f32`.
    pub fn get_f32(&self, pos: usize) -> Result<f32> {
        numeric_read!(self, pos, to_f32, Float)
    }

    /// Reads a numeric position as `f64`.
    pub fn get_f64(&self, pos: usize) -> Result<f64> {
        numeric_read!(self, pos, to_f64, Double)
    }

    /// Reads a boolean position.
    pub fn get_bool(&self, pos: usize) -> Result<bool> {
        match self {
            Self::Boolean(c) => c.get(pos).copied().ok_or(TsFileError::OutOfBounds {
                index: pos,
                len: c.len(),
            }),
            other => Err(TsFileError::TypeMismatch {
                expected: TSDataType::Boolean,
                actual: other.data_type(),
            }),
        }
    }

    /// Reads a text position.
    pub fn get_text(&self, pos: usize) -> Result<&str> {
        match self {
            Self::Text(c) => c.get(pos).map(String::as_str).ok_or(TsFileError::OutOfBounds {
                index: pos,
                len: c.len(),
            }),
            other => Err(TsFileError::TypeMismatch {
                expected: TSDataType::Text,
                actual: other.data_type(),
            }),
        }
    }
}

/// Append-only builder for a runtime-typed column.
#[derive(Debug, Clone)]
pub enum ColumnDataBuilder {
    /// Boolean builder.
    Boolean(ColumnBuilder<bool>),
    /// 32-bit integer builder.
    Int32(ColumnBuilder<i32>),
    /// 64-bit integer builder.
    Int64(ColumnBuilder<i64>),
    /// 32-bit float builder.
    Float(ColumnBuilder<f32>),
    /// 64-bit float builder.
    Double(ColumnBuilder<f64>),
    /// Text builder.
    Text(ColumnBuilder<String>),
}

impl ColumnDataBuilder {
    /// Creates an empty builder for the type.
    pub fn new(data_type: TSDataType, capacity: usize) -> Self {
        match data_type {
            TSDataType::Boolean => Self::Boolean(ColumnBuilder::with_capacity(capacity)),
            TSDataType::Int32 => Self::Int32(ColumnBuilder::with_capacity(capacity)),
            TSDataType::Int64 => Self::Int64(ColumnBuilder::with_capacity(capacity)),
            TSDataType::Float => Self::Float(ColumnBuilder::with_capacity(capacity)),
            TSDataType::Double => Self::Double(ColumnBuilder::with_capacity(capacity)),
            TSDataType::Text => Self::Text(ColumnBuilder::with_capacity(capacity)),
        }
    }

    /// Logical type being built.
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

    /// Number of appended values.
    pub fn len(&self) -> usize {
        with_column!(self, ColumnDataBuilder, b => b.len())
    }

    /// Returns true if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value of exactly the builder's type.
    pub fn append_value(&mut self, value: &Value) -> Result<()> {
        with_column!(self, ColumnDataBuilder, b => append_from_value(b, value))
    }

    /// Appends an `i32` converted to the builder's numeric type.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        numeric_write!(self, value, from_i32, Int32);
        Ok(())
    }

    /// Appends an `i64` converted to the builder's numeric type.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        numeric_write!(self, value, from_i64, Int64);
        Ok(())
    }

    /// Appends an `f32` converted to the builder's numeric type.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        numeric_write!(self, value, from_f32, Float);
        Ok(())
    }

    /// Appends an `f64` converted to the builder's numeric type.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        numeric_write!(self, value, from_f64, Double);
        Ok(())
    }

    /// Appends a boolean.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        match self {
            Self::Boolean(b) => {
                b.append(value);
                Ok(())
            }
            other => Err(TsFileError::TypeMismatch {
                expected: other.data_type(),
                actual: TSDataType::Boolean,
            }),
        }
    }

    /// Appends a text value.
    pub fn write_text(&mut self, value: &str) -> Result<()> {
        match self {
            Self::Text(b) => {
                b.append(value.to_string());
                Ok(())
            }
            other => Err(TsFileError::TypeMismatch {
                expected: other.data_type(),
                actual: TSDataType::Text,
            }),
        }
    }

    /// Approximate plain-encoded size of the appended values in bytes.
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Text(b) => b.values().iter().map(|s| s.len() + 4).sum(),
            other => {
                let width = other.data_type().fixed_width().unwrap_or(0);
                width * other.len()
            }
        }
    }

    /// Finishes the builder.
    pub fn build(self) -> ColumnData {
        match self {
            Self::Boolean(b) => ColumnData::Boolean(b.build()),
            Self::Int32(b) => ColumnData::Int32(b.build()),
            Self::Int64(b) => ColumnData::Int64(b.build()),
            Self::Float(b) => ColumnData::Float(b.build()),
            Self::Double(b) => ColumnData::Double(b.build()),
            Self::Text(b) => ColumnData::Text(b.build()),
        }
    }

    /// Finishes the current column and leaves an empty builder of the same type.
    pub fn take(&mut self) -> ColumnData {
        let empty = Self::new(self.data_type(), self.len());
        std::mem::replace(self, empty).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_get_set() {
        let mut column = Column::<i32>::filled(3);
        column.set(1, 42).unwrap();
        assert_eq!(column.get(1), Some(&42));
        assert_eq!(column.values(), &[0, 42, 0]);

        let err = column.set(3, 1).unwrap_err();
        assert!(matches!(err, TsFileError::OutOfBounds { index: 3, len: 3 }));
    }

    #[test]
    fn test_float_column_reads_as_double_and_int() {
        let column = ColumnData::Float(Column::new(vec![1.5f32, -2.75]));
        assert_eq!(column.get_f64(0).unwrap(), 1.5f64);
        assert_eq!(column.get_i32(0).unwrap(), 1);
        // Truncation toward zero, not rounding.
        assert_eq!(column.get_i64(1).unwrap(), -2);
    }

    #[test]
    fn test_double_column_narrows_to_float() {
        let column = ColumnData::Double(Column::new(vec![3.9f64]));
        assert_eq!(column.get_f32(0).unwrap(), 3.9f32);
        assert_eq!(column.get_i32(0).unwrap(), 3);
    }

    #[test]
    fn test_non_numeric_read_is_type_mismatch() {
        let column = ColumnData::Text(Column::new(vec!["a".to_string()]));
        assert!(matches!(
            column.get_i64(0),
            Err(TsFileError::TypeMismatch { .. })
        ));
        assert_eq!(column.get_text(0).unwrap(), "a");
    }

    #[test]
    fn test_builder_writes_convert() {
        let mut builder = ColumnDataBuilder::new(TSDataType::Float, 4);
        builder.write_i32(7).unwrap();
        builder.write_f64(2.5).unwrap();
        builder.write_i64(-1).unwrap();
        assert!(builder.write_bool(true).is_err());

        let column = builder.build();
        assert_eq!(
            column,
            ColumnData::Float(Column::new(vec![7.0, 2.5, -1.0]))
        );
    }

    #[test]
    fn test_builder_append_value_requires_exact_type() {
        let mut builder = ColumnDataBuilder::new(TSDataType::Int64, 2);
        builder.append_value(&Value::Int64(5)).unwrap();
        let err = builder.append_value(&Value::Int32(5)).unwrap_err();
        assert!(matches!(
            err,
            TsFileError::TypeMismatch {
                expected: TSDataType::Int64,
                actual: TSDataType::Int32
            }
        ));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_builder_take_resets() {
        let mut builder = ColumnDataBuilder::new(TSDataType::Text, 0);
        builder.write_text("abc").unwrap();
        assert_eq!(builder.estimated_size(), 7);
        let column = builder.take();
        assert_eq!(column.len(), 1);
        assert!(builder.is_empty());
        assert_eq!(builder.data_type(), TSDataType::Text);
    }

    #[test]
    fn test_set_value_type_checked() {
        let mut column = ColumnData::filled(TSDataType::Boolean, 2);
        column.set_value(1, &Value::Boolean(true)).unwrap();
        assert_eq!(column.get_value(1), Some(Value::Boolean(true)));
        assert!(column.set_value(0, &Value::Int32(1)).is_err());
    }
}
