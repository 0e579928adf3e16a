//! Run-length encoding: a sequence of `(plain value, varint run length)` pairs.

use super::plain::PlainValue;
use crate::error::{Result, TsFileError};
use crate::io::{put_uvarint, ByteReader};

/// Encodes consecutive equal values as runs.
pub fn encode<T: PlainValue>(values: &[T], out: &mut Vec<u8>) {
    let mut iter = values.iter();
    let Some(mut current) = iter.next() else {
        return;
    };
    let mut run: u64 = 1;

    for value in iter {
        if value == current {
            run += 1;
        } else {
            current.write_plain(out);
            put_uvarint(out, run);
            current = value;
            run = 1;
        }
    }

    current.write_plain(out);
    put_uvarint(out, run);
}

/// Decodes runs until exactly `count` values are produced.
pub fn decode<T: PlainValue>(reader: &mut ByteReader<'_>, count: usize) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(count.min(reader.remaining().saturating_mul(8)));
    while values.len() < count {
        let value = T::read_plain(reader)?;
        let run = reader.read_len()?;
        if run == 0 || run > count - values.len() {
            return Err(TsFileError::CodecMismatch(format!(
                "run of {} values with {} remaining",
                run,
                count - values.len()
            )));
        }
        values.extend(std::iter::repeat(value).take(run));
    }
    Ok(values)
}
