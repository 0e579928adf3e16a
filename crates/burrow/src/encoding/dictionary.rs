//! Dictionary encoding for text: the distinct strings in first-seen order,
//! then one varint index per value.

use super::plain::PlainValue;
use crate::error::{Result, TsFileError};
use crate::io::{put_uvarint, ByteReader};
use std::collections::HashMap;

/// Encodes text values as a dictionary plus indices.
pub fn encode(values: &[String], out: &mut Vec<u8>) {
    let mut ids: HashMap<&str, u64> = HashMap::new();
    let mut entries: Vec<&String> = Vec::new();
    let mut indices = Vec::with_capacity(values.len());

    for value in values {
        let id = *ids.entry(value.as_str()).or_insert_with(|| {
            entries.push(value);
            entries.len() as u64 - 1
        });
        indices.push(id);
    }

    put_uvarint(out, entries.len() as u64);
    for entry in entries {
        entry.write_plain(out);
    }
    for id in indices {
        put_uvarint(out, id);
    }
}

/// Decodes exactly `count` values.
pub fn decode(reader: &mut ByteReader<'_>, count: usize) -> Result<Vec<String>> {
    let size = reader.read_len()?;
    if size > reader.remaining() {
        return Err(TsFileError::CodecMismatch(format!(
            "dictionary of {} entries in {} bytes",
            size,
            reader.remaining()
        )));
    }
    let mut dictionary = Vec::with_capacity(size);
    for _ in 0..size {
        dictionary.push(String::read_plain(reader)?);
    }

    let mut values = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        let id = reader.read_len()?;
        let entry = dictionary.get(id).ok_or_else(|| {
            TsFileError::CodecMismatch(format!("dictionary index {} of {}", id, size))
        })?;
        values.push(entry.clone());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dictionary_roundtrip() {
        let values = strings(&["on", "off", "on", "on", "fault", "off"]);
        let mut out = Vec::new();
        encode(&values, &mut out);

        // 3 entries, then 6 one-byte indices.
        assert_eq!(out[0], 3);
        assert_eq!(&out[out.len() - 6..], &[0, 1, 0, 0, 2, 1]);

        let mut reader = ByteReader::new(&out);
        assert_eq!(decode(&mut reader, values.len()).unwrap(), values);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_index_out_of_range() {
        let mut out = Vec::new();
        encode(&strings(&["a"]), &mut out);
        *out.last_mut().unwrap() = 5;
        let mut reader = ByteReader::new(&out);
        assert!(decode(&mut reader, 1).is_err());
    }

    #[test]
    fn test_empty() {
        let mut out = Vec::new();
        encode(&[], &mut out);
        assert_eq!(out, vec![0]);
        let mut reader = ByteReader::new(&out);
        assert!(decode(&mut reader, 0).unwrap().is_empty());
    }
}
