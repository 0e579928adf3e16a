//! Verbatim values: fixed-width little-endian, booleans as one byte, text as a
//! varint length followed by UTF-8.

use crate::column::ColumnValue;
use crate::error::{Result, TsFileError};
use crate::io::{put_uvarint, ByteReader};

/// A value with a verbatim byte form.
pub trait PlainValue: ColumnValue {
    /// Appends the value's plain bytes.
    fn write_plain(&self, out: &mut Vec<u8>);

    /// Reads one value.
    fn read_plain(reader: &mut ByteReader<'_>) -> Result<Self>;
}

macro_rules! impl_plain_le {
    ($t:ty, $read:ident) => {
        impl PlainValue for $t {
            fn write_plain(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_plain(reader: &mut ByteReader<'_>) -> Result<Self> {
                reader.$read()
            }
        }
    };
}

impl_plain_le!(i32, read_i32);
impl_plain_le!(i64, read_i64);
impl_plain_le!(f32, read_f32);
impl_plain_le!(f64, read_f64);

impl PlainValue for bool {
    fn write_plain(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn read_plain(reader: &mut ByteReader<'_>) -> Result<Self> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TsFileError::CodecMismatch(format!(
                "invalid boolean byte {:#04x}",
                other
            ))),
        }
    }
}

impl PlainValue for String {
    fn write_plain(&self, out: &mut Vec<u8>) {
        put_uvarint(out, self.len() as u64);
        out.extend_from_slice(self.as_bytes());
    }

    fn read_plain(reader: &mut ByteReader<'_>) -> Result<Self> {
        let len = reader.read_len()?;
        reader.read_utf8(len)
    }
}

/// Encodes every value verbatim.
pub fn encode<T: PlainValue>(values: &[T], out: &mut Vec<u8>) {
    for value in values {
        value.write_plain(out);
    }
}

/// Decodes exactly `count` values.
pub fn decode<T: PlainValue>(reader: &mut ByteReader<'_>, count: usize) -> Result<Vec<T>> {
    // Capacity is bounded by the input so a corrupt count cannot over-allocate.
    let mut values = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        values.push(T::read_plain(reader)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_layout() {
        let mut out = Vec::new();
        encode(&[1i32, -1], &mut out);
        assert_eq!(out, vec![1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);

        let mut out = Vec::new();
        encode(&["ab".to_string()], &mut out);
        assert_eq!(out, vec![2, b'a', b'b']);
    }

    #[test]
    fn test_plain_text_roundtrip() {
        let values = vec!["".to_string(), "héllo".to_string(), "x".repeat(300)];
        let mut out = Vec::new();
        encode(&values, &mut out);
        let mut reader = ByteReader::new(&out);
        assert_eq!(decode::<String>(&mut reader, 3).unwrap(), values);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_invalid_boolean_byte() {
        let mut reader = ByteReader::new(&[2]);
        assert!(decode::<bool>(&mut reader, 1).is_err());
    }

    #[test]
    fn test_short_input() {
        let mut reader = ByteReader::new(&[0, 0, 0, 0, 0, 0, 0]);
        assert!(decode::<i64>(&mut reader, 1).is_err());
    }
}
