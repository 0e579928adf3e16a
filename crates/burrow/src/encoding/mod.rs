//! Value encodings.
//!
//! [`encode`] and [`decode`] dispatch on the column's logical type and the
//! measurement's [`TSEncoding`]. Decoding must consume the byte sequence
//! exactly and yield exactly the declared number of values; anything else is
//! a [`TsFileError::CodecMismatch`].
//!
//! | Encoding   | Types                                   |
//! |------------|-----------------------------------------|
//! | Plain      | all                                     |
//! | Dictionary | text                                    |
//! | Rle        | all (float/double scaled to integers)   |
//! | Ts2Diff    | numeric (float/double scaled)           |
//! | Gorilla    | numeric (XOR for floats, delta-of-delta for integers) |
//!
//! Scaled float encodings keep `max_point_number` decimal digits.

pub mod bits;
pub mod dictionary;
pub mod gorilla;
pub mod plain;
pub mod rle;
pub mod ts2diff;

use crate::column::{Column, ColumnData, NumericValue};
use crate::error::{Result, TsFileError};
use crate::io::ByteReader;
use crate::types::{TSDataType, TSEncoding, Value};
use std::collections::BTreeMap;

/// Parameter key bounding the byte length of text values.
pub const MAX_STRING_LENGTH: &str = "max_string_length";

/// Parameter key for the decimal digits kept by scaled float encodings.
pub const MAX_POINT_NUMBER: &str = "max_point_number";

/// Default decimal digits kept by scaled float encodings.
pub const DEFAULT_MAX_POINT_NUMBER: u32 = 2;

/// Largest accepted `max_point_number`; `10^18` is the largest power of ten in an `i64`.
const MAX_DECIMAL_DIGITS: u32 = 18;

/// Encoder parameters parsed from a measurement's property map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingParams {
    /// Maximum byte length of a text value, if bounded.
    pub max_string_length: Option<usize>,
    /// Decimal digits kept when Rle or Ts2Diff encode floats.
    pub max_point_number: u32,
}

impl Default for EncodingParams {
    fn default() -> Self {
        Self {
            max_string_length: None,
            max_point_number: DEFAULT_MAX_POINT_NUMBER,
        }
    }
}

impl EncodingParams {
    /// Parses the recognized keys; unknown keys are ignored.
    pub fn from_props(props: &BTreeMap<String, String>) -> Result<Self> {
        let mut params = Self::default();
        if let Some(raw) = props.get(MAX_STRING_LENGTH) {
            params.max_string_length = Some(parse_param(MAX_STRING_LENGTH, raw)?);
        }
        if let Some(raw) = props.get(MAX_POINT_NUMBER) {
            let digits: u32 = parse_param(MAX_POINT_NUMBER, raw)?;
            if digits > MAX_DECIMAL_DIGITS {
                return Err(TsFileError::InvalidParameter {
                    key: MAX_POINT_NUMBER.to_string(),
                    value: raw.clone(),
                });
            }
            params.max_point_number = digits;
        }
        Ok(params)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| TsFileError::InvalidParameter {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Encodes a column.
pub fn encode(column: &ColumnData, encoding: TSEncoding, params: &EncodingParams) -> Result<Vec<u8>> {
    let data_type = column.data_type();
    if !encoding.supports(data_type) {
        return Err(TsFileError::UnsupportedEncoding {
            data_type,
            encoding,
        });
    }

    let mut out = Vec::new();
    match (encoding, column) {
        (TSEncoding::Plain, column) => {
            crate::column::with_column!(column, ColumnData, c => plain::encode(c.values(), &mut out))
        }
        (TSEncoding::Dictionary, ColumnData::Text(c)) => dictionary::encode(c.values(), &mut out),
        (TSEncoding::Rle, ColumnData::Float(c)) => {
            rle::encode(&scale(c, params.max_point_number)?, &mut out)
        }
        (TSEncoding::Rle, ColumnData::Double(c)) => {
            rle::encode(&scale(c, params.max_point_number)?, &mut out)
        }
        (TSEncoding::Rle, column) => {
            crate::column::with_column!(column, ColumnData, c => rle::encode(c.values(), &mut out))
        }
        (TSEncoding::Ts2Diff, ColumnData::Int32(c)) => ts2diff::encode(&widen(c), &mut out),
        (TSEncoding::Ts2Diff, ColumnData::Int64(c)) => ts2diff::encode(c.values(), &mut out),
        (TSEncoding::Ts2Diff, ColumnData::Float(c)) => {
            ts2diff::encode(&scale(c, params.max_point_number)?, &mut out)
        }
        (TSEncoding::Ts2Diff, ColumnData::Double(c)) => {
            ts2diff::encode(&scale(c, params.max_point_number)?, &mut out)
        }
        (TSEncoding::Gorilla, ColumnData::Int32(c)) => out = gorilla::encode_integers(&widen(c)),
        (TSEncoding::Gorilla, ColumnData::Int64(c)) => out = gorilla::encode_integers(c.values()),
        (TSEncoding::Gorilla, ColumnData::Float(c)) => out = gorilla::encode_floats(c.values()),
        (TSEncoding::Gorilla, ColumnData::Double(c)) => out = gorilla::encode_floats(c.values()),
        _ => {
            return Err(TsFileError::UnsupportedEncoding {
                data_type,
                encoding,
            })
        }
    }
    Ok(out)
}

macro_rules! decode_by_type {
    ($codec:ident, $data_type:expr, $reader:expr, $count:expr) => {
        match $data_type {
            TSDataType::Boolean => ColumnData::Boolean(Column::new($codec::decode::<bool>($reader, $count)?)),
            TSDataType::Int32 => ColumnData::Int32(Column::new($codec::decode::<i32>($reader, $count)?)),
            TSDataType::Int64 => ColumnData::Int64(Column::new($codec::decode::<i64>($reader, $count)?)),
            TSDataType::Float => ColumnData::Float(Column::new($codec::decode::<f32>($reader, $count)?)),
            TSDataType::Double => ColumnData::Double(Column::new($codec::decode::<f64>($reader, $count)?)),
            TSDataType::Text => ColumnData::Text(Column::new($codec::decode::<String>($reader, $count)?)),
        }
    };
}

/// Decodes exactly `count` values of `data_type` from `bytes`.
pub fn decode(
    bytes: &[u8],
    data_type: TSDataType,
    encoding: TSEncoding,
    count: usize,
    params: &EncodingParams,
) -> Result<ColumnData> {
    if !encoding.supports(data_type) {
        return Err(TsFileError::CodecMismatch(format!(
            "{:?} cannot decode {}",
            encoding, data_type
        )));
    }

    let digits = params.max_point_number;
    let mut reader = ByteReader::new(bytes);
    let column = match (encoding, data_type) {
        (TSEncoding::Gorilla, TSDataType::Int32) => {
            narrow(gorilla::decode_integers(bytes, count)?)?
        }
        (TSEncoding::Gorilla, TSDataType::Int64) => {
            ColumnData::Int64(Column::new(gorilla::decode_integers(bytes, count)?))
        }
        (TSEncoding::Gorilla, TSDataType::Float) => {
            ColumnData::Float(Column::new(gorilla::decode_floats(bytes, count)?))
        }
        (TSEncoding::Gorilla, TSDataType::Double) => {
            ColumnData::Double(Column::new(gorilla::decode_floats(bytes, count)?))
        }
        (TSEncoding::Plain, _) => decode_by_type!(plain, data_type, &mut reader, count),
        (TSEncoding::Dictionary, _) => {
            ColumnData::Text(Column::new(dictionary::decode(&mut reader, count)?))
        }
        (TSEncoding::Rle, TSDataType::Float) => {
            ColumnData::Float(unscale_f32(&rle::decode(&mut reader, count)?, digits))
        }
        (TSEncoding::Rle, TSDataType::Double) => {
            ColumnData::Double(unscale_f64(&rle::decode(&mut reader, count)?, digits))
        }
        (TSEncoding::Rle, _) => decode_by_type!(rle, data_type, &mut reader, count),
        (TSEncoding::Ts2Diff, TSDataType::Int32) => narrow(ts2diff::decode(&mut reader, count)?)?,
        (TSEncoding::Ts2Diff, TSDataType::Int64) => {
            ColumnData::Int64(Column::new(ts2diff::decode(&mut reader, count)?))
        }
        (TSEncoding::Ts2Diff, TSDataType::Float) => {
            ColumnData::Float(unscale_f32(&ts2diff::decode(&mut reader, count)?, digits))
        }
        (TSEncoding::Ts2Diff, TSDataType::Double) => {
            ColumnData::Double(unscale_f64(&ts2diff::decode(&mut reader, count)?, digits))
        }
        (encoding, data_type) => {
            return Err(TsFileError::CodecMismatch(format!(
                "{:?} cannot decode {}",
                encoding, data_type
            )))
        }
    };

    // Bit-stream codecs check their own padding.
    if encoding != TSEncoding::Gorilla && !reader.is_empty() {
        return Err(TsFileError::CodecMismatch(format!(
            "{} trailing bytes after {} {:?} values",
            reader.remaining(),
            count,
            encoding
        )));
    }
    if column.len() != count {
        return Err(TsFileError::CodecMismatch(format!(
            "decoded {} values, expected {}",
            column.len(),
            count
        )));
    }
    Ok(column)
}

fn widen(column: &Column<i32>) -> Vec<i64> {
    column.iter().map(|&v| i64::from(v)).collect()
}

fn narrow(values: Vec<i64>) -> Result<ColumnData> {
    let narrowed = values
        .into_iter()
        .map(|v| {
            i32::try_from(v)
                .map_err(|_| TsFileError::CodecMismatch(format!("{} overflows INT32", v)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ColumnData::Int32(Column::new(narrowed)))
}

/// Checks at ingestion time that `value` can be encoded under `encoding`, so
/// that sealing a page never fails on data already accepted.
pub fn check_value(value: &Value, encoding: TSEncoding, params: &EncodingParams) -> Result<()> {
    match value {
        Value::Text(s) => match params.max_string_length {
            Some(max) if s.len() > max => Err(TsFileError::ValueTooLong { len: s.len(), max }),
            _ => Ok(()),
        },
        Value::Float(v) if encoding.is_lossy(TSDataType::Float) => {
            scale_one(f64::from(*v), params.max_point_number).map(|_| ())
        }
        Value::Double(v) if encoding.is_lossy(TSDataType::Double) => {
            scale_one(*v, params.max_point_number).map(|_| ())
        }
        _ => Ok(()),
    }
}

fn scale_one(v: f64, digits: u32) -> Result<i64> {
    let scaled = (v * 10f64.powi(digits as i32)).round();
    // 2^63 is the exclusive bound; i64::MAX itself is not representable as f64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if scaled.is_finite() && (-LIMIT..LIMIT).contains(&scaled) {
        Ok(scaled as i64)
    } else {
        Err(TsFileError::CodecMismatch(format!(
            "{} cannot be stored with {} decimal digits",
            v, digits
        )))
    }
}

/// Scales floats to integers keeping `digits` decimal places.
fn scale<T: NumericValue>(column: &Column<T>, digits: u32) -> Result<Vec<i64>> {
    column.iter().map(|&v| scale_one(v.to_f64(), digits)).collect()
}

fn unscale_f32(values: &[i64], digits: u32) -> Column<f32> {
    let factor = 10f32.powi(digits as i32);
    Column::new(values.iter().map(|&v| v as f32 / factor).collect())
}

fn unscale_f64(values: &[i64], digits: u32) -> Column<f64> {
    let factor = 10f64.powi(digits as i32);
    Column::new(values.iter().map(|&v| v as f64 / factor).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(column: ColumnData, encoding: TSEncoding) -> ColumnData {
        let params = EncodingParams::default();
        let bytes = encode(&column, encoding, &params).unwrap();
        decode(&bytes, column.data_type(), encoding, column.len(), &params).unwrap()
    }

    #[test]
    fn test_params_from_props() {
        let mut props = BTreeMap::new();
        props.insert(MAX_POINT_NUMBER.to_string(), "3".to_string());
        props.insert(MAX_STRING_LENGTH.to_string(), "16".to_string());
        props.insert("unrelated".to_string(), "x".to_string());
        let params = EncodingParams::from_props(&props).unwrap();
        assert_eq!(params.max_point_number, 3);
        assert_eq!(params.max_string_length, Some(16));

        props.insert(MAX_POINT_NUMBER.to_string(), "many".to_string());
        assert!(matches!(
            EncodingParams::from_props(&props),
            Err(TsFileError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_every_numeric_encoding_roundtrips_int32() {
        let column = ColumnData::Int32(Column::new(vec![i32::MIN, -1, 0, 0, 7, i32::MAX]));
        for encoding in [TSEncoding::Plain, TSEncoding::Rle, TSEncoding::Ts2Diff, TSEncoding::Gorilla] {
            assert_eq!(roundtrip(column.clone(), encoding), column, "{:?}", encoding);
        }
    }

    #[test]
    fn test_scaled_double_keeps_declared_digits() {
        let column = ColumnData::Double(Column::new(vec![1.25, 1.25, -3.5, 0.07]));
        assert_eq!(roundtrip(column.clone(), TSEncoding::Rle), column);
        assert_eq!(roundtrip(column.clone(), TSEncoding::Ts2Diff), column);

        // A third decimal is beyond the default two digits.
        let lossy = ColumnData::Double(Column::new(vec![1.234]));
        assert_eq!(
            roundtrip(lossy, TSEncoding::Ts2Diff),
            ColumnData::Double(Column::new(vec![1.23]))
        );
    }

    #[test]
    fn test_scaled_float_rejects_non_finite() {
        let column = ColumnData::Float(Column::new(vec![f32::NAN]));
        let err = encode(&column, TSEncoding::Rle, &EncodingParams::default()).unwrap_err();
        assert!(matches!(err, TsFileError::CodecMismatch(_)));
    }

    #[test]
    fn test_check_value() {
        let params = EncodingParams {
            max_string_length: Some(3),
            ..EncodingParams::default()
        };
        assert!(check_value(&Value::Text("abc".into()), TSEncoding::Plain, &params).is_ok());
        assert!(matches!(
            check_value(&Value::Text("abcd".into()), TSEncoding::Plain, &params),
            Err(TsFileError::ValueTooLong { len: 4, max: 3 })
        ));
        assert!(check_value(&Value::Double(f64::INFINITY), TSEncoding::Rle, &params).is_err());
        assert!(check_value(&Value::Double(f64::INFINITY), TSEncoding::Gorilla, &params).is_ok());
    }

    #[test]
    fn test_unsupported_pair() {
        let column = ColumnData::Boolean(Column::new(vec![true]));
        let err = encode(&column, TSEncoding::Gorilla, &EncodingParams::default()).unwrap_err();
        assert!(matches!(err, TsFileError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn test_decode_with_wrong_encoding_is_mismatch() {
        let column = ColumnData::Int64(Column::new((0..50).collect()));
        let bytes = encode(&column, TSEncoding::Plain, &EncodingParams::default()).unwrap();
        let err = decode(
            &bytes,
            TSDataType::Int64,
            TSEncoding::Rle,
            50,
            &EncodingParams::default(),
        )
        .unwrap_err();
        assert!(err.is_codec_error(), "{:?}", err);
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let column = ColumnData::Int64(Column::new(vec![1, 2]));
        let mut bytes = encode(&column, TSEncoding::Plain, &EncodingParams::default()).unwrap();
        bytes.push(0);
        let err = decode(
            &bytes,
            TSDataType::Int64,
            TSEncoding::Plain,
            2,
            &EncodingParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TsFileError::CodecMismatch(_)));
    }

    #[test]
    fn test_text_encodings() {
        let column = ColumnData::Text(Column::new(
            ["a", "bb", "a", "", "bb"].iter().map(|s| s.to_string()).collect(),
        ));
        for encoding in [TSEncoding::Plain, TSEncoding::Rle, TSEncoding::Dictionary] {
            assert_eq!(roundtrip(column.clone(), encoding), column, "{:?}", encoding);
        }
    }
}
