//! Pages: the smallest encoded and compressed unit.
//!
//! ## Layout
//!
//! ```text
//! page_len      u32   bytes that follow, CRC included
//! point_count   u32
//! start_time    i64
//! end_time      i64
//! stream_count  u16   1 time stream + one per value column
//! statistics    one per value column
//! streams       uncompressed_len u32 | compressed_len u32 | bytes
//! crc32         u32   over point_count..end of streams
//! ```
//!
//! A single-column page's value stream holds exactly `point_count` values. An
//! aligned page's value stream starts with a presence bitmap of
//! `ceil(point_count / 8)` bytes (MSB first) followed by the present values.

use crate::column::{ColumnBuilder, ColumnData, ColumnDataBuilder};
use crate::compression::compressor_for;
use crate::encoding::{self, EncodingParams};
use crate::error::{Result, TsFileError};
use crate::io::ByteReader;
use crate::schema::MeasurementSchema;
use crate::statistics::Statistics;
use crate::types::{CompressionType, TSDataType, TSEncoding, Timestamp, Value};
use bitvec::prelude::*;

/// Column layout shared by every page of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// Whether value streams carry presence bitmaps.
    pub aligned: bool,
    /// Time column encoding.
    pub time_encoding: TSEncoding,
    /// Time column compression.
    pub time_compression: CompressionType,
    /// Value columns.
    pub columns: Vec<MeasurementSchema>,
}

/// A sealed page ready to be appended to a chunk.
#[derive(Debug, Clone)]
pub struct SealedPage {
    /// Serialized page, `page_len` prefix included.
    pub bytes: Vec<u8>,
    /// Number of timestamps.
    pub point_count: u32,
    /// First timestamp.
    pub start_time: Timestamp,
    /// Last timestamp.
    pub end_time: Timestamp,
    /// Statistics per value column.
    pub statistics: Vec<Statistics>,
}

struct ValueBuffer {
    values: ColumnDataBuilder,
    present: BitVec<u8, Msb0>,
    present_times: Vec<Timestamp>,
}

/// Buffers points for one page.
pub struct PageWriter {
    layout: PageLayout,
    params: Vec<EncodingParams>,
    times: ColumnBuilder<Timestamp>,
    buffers: Vec<ValueBuffer>,
}

impl PageWriter {
    /// Creates an empty page writer.
    pub fn new(layout: PageLayout) -> Result<Self> {
        let params = layout
            .columns
            .iter()
            .map(MeasurementSchema::encoding_params)
            .collect::<Result<Vec<_>>>()?;
        let buffers = layout.columns.iter().map(|c| new_buffer(c.data_type)).collect();
        Ok(Self {
            layout,
            params,
            times: ColumnBuilder::new(),
            buffers,
        })
    }

    /// Column layout of the page.
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Number of buffered timestamps.
    pub fn point_count(&self) -> usize {
        self.times.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Approximate unencoded size of the buffered points.
    pub fn estimated_size(&self) -> usize {
        let bitmap = if self.layout.aligned {
            self.point_count().div_ceil(8) * self.buffers.len()
        } else {
            0
        };
        self.times.len() * 8 + bitmap + self.buffers.iter().map(|b| b.values.estimated_size()).sum::<usize>()
    }

    /// Buffers one timestamp with one entry per column. Only aligned pages
    /// accept `None`.
    pub fn write(&mut self, timestamp: Timestamp, values: &[Option<&Value>]) -> Result<()> {
        if values.len() != self.buffers.len() {
            return Err(TsFileError::ColumnAlignment {
                expected: self.buffers.len(),
                actual: values.len(),
            });
        }
        for (value, column) in values.iter().zip(&self.layout.columns) {
            match value {
                Some(v) if v.data_type() != column.data_type => {
                    return Err(TsFileError::TypeMismatch {
                        expected: column.data_type,
                        actual: v.data_type(),
                    })
                }
                None if !self.layout.aligned => {
                    return Err(TsFileError::ColumnAlignment {
                        expected: 1,
                        actual: 0,
                    })
                }
                _ => {}
            }
        }

        self.times.append(timestamp);
        for (value, buffer) in values.iter().zip(&mut self.buffers) {
            match value {
                Some(v) => {
                    buffer.values.append_value(v)?;
                    buffer.present.push(true);
                    buffer.present_times.push(timestamp);
                }
                None => buffer.present.push(false),
            }
        }
        Ok(())
    }

    /// Encodes, compresses and serializes the buffered points, leaving the
    /// writer empty.
    pub fn seal(&mut self) -> Result<SealedPage> {
        let times = std::mem::take(&mut self.times).build();
        let point_count = times.len();
        let start_time = times.values().first().copied().unwrap_or(Timestamp::MAX);
        let end_time = times.values().last().copied().unwrap_or(Timestamp::MIN);
        let time_data = ColumnData::Int64(times);

        let mut statistics = Vec::with_capacity(self.buffers.len());
        let mut streams = Vec::with_capacity(self.buffers.len() + 1);
        streams.push(compress_stream(
            encoding::encode(&time_data, self.layout.time_encoding, &EncodingParams::default())?,
            self.layout.time_compression,
        )?);

        for ((buffer, column), params) in self.buffers.iter_mut().zip(&self.layout.columns).zip(&self.params) {
            let values = buffer.values.take();
            let present_times = std::mem::take(&mut buffer.present_times);
            let present = std::mem::take(&mut buffer.present);
            statistics.push(Statistics::from_column(&present_times, &values)?);

            let mut raw = Vec::new();
            if self.layout.aligned {
                raw.extend_from_slice(present.as_raw_slice());
            }
            raw.extend(encoding::encode(&values, column.encoding, params)?);
            streams.push(compress_stream(raw, column.compression)?);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&(point_count as u32).to_le_bytes());
        body.extend_from_slice(&start_time.to_le_bytes());
        body.extend_from_slice(&end_time.to_le_bytes());
        body.extend_from_slice(&(streams.len() as u16).to_le_bytes());
        for stats in &statistics {
            stats.write_to(&mut body)?;
        }
        for (uncompressed_len, compressed) in &streams {
            body.extend_from_slice(&(*uncompressed_len as u32).to_le_bytes());
            body.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            body.extend_from_slice(compressed);
        }
        let crc = crc32fast::hash(&body);

        let mut bytes = Vec::with_capacity(body.len() + 8);
        bytes.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&crc.to_le_bytes());

        Ok(SealedPage {
            bytes,
            point_count: point_count as u32,
            start_time,
            end_time,
            statistics,
        })
    }
}

fn new_buffer(data_type: TSDataType) -> ValueBuffer {
    ValueBuffer {
        values: ColumnDataBuilder::new(data_type, 0),
        present: BitVec::new(),
        present_times: Vec::new(),
    }
}

fn compress_stream(raw: Vec<u8>, compression: CompressionType) -> Result<(usize, Vec<u8>)> {
    let compressed = compressor_for(compression)?.compress(&raw)?;
    Ok((raw.len(), compressed))
}

/// Header fields of a page, available without decoding its streams.
#[derive(Debug, Clone, PartialEq)]
pub struct PageHeader {
    /// Number of timestamps.
    pub point_count: u32,
    /// First timestamp.
    pub start_time: Timestamp,
    /// Last timestamp.
    pub end_time: Timestamp,
    /// Statistics per value column.
    pub statistics: Vec<Statistics>,
}

/// One decoded value column of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageColumn {
    /// Presence per timestamp; `None` means every timestamp has a value.
    pub present: Option<BitVec<u8, Msb0>>,
    /// The present values in time order.
    pub values: ColumnData,
}

impl PageColumn {
    /// Returns the value at timestamp position `row`, given a cursor over
    /// `values` that the caller advances in row order.
    pub fn value_at(&self, row: usize, cursor: &mut usize) -> Option<Value> {
        match &self.present {
            Some(bits) if !bits.get(row).map(|b| *b).unwrap_or(false) => None,
            _ => {
                let value = self.values.get_value(*cursor);
                *cursor += 1;
                value
            }
        }
    }
}

/// A fully decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPage {
    /// Header fields.
    pub header: PageHeader,
    /// Timestamps in order.
    pub timestamps: Vec<Timestamp>,
    /// One entry per layout column; `None` for columns that were not requested.
    pub columns: Vec<Option<PageColumn>>,
}

/// Parses the header of a page body (the bytes after `page_len`).
pub fn read_header(body: &[u8], layout: &PageLayout) -> Result<(PageHeader, usize)> {
    let mut reader = ByteReader::new(body);
    let point_count = reader.read_u32()?;
    let start_time = reader.read_i64()?;
    let end_time = reader.read_i64()?;
    let stream_count = reader.read_u16()? as usize;
    if stream_count != layout.columns.len() + 1 {
        return Err(TsFileError::CodecMismatch(format!(
            "page has {} streams, chunk declares {} columns",
            stream_count,
            layout.columns.len()
        )));
    }
    let mut statistics = Vec::with_capacity(layout.columns.len());
    for column in &layout.columns {
        let stats = Statistics::read_from(&mut reader)?;
        if stats.data_type != column.data_type {
            return Err(TsFileError::CodecMismatch(format!(
                "page statistics typed {} for {} column {}",
                stats.data_type, column.data_type, column.name
            )));
        }
        statistics.push(stats);
    }
    Ok((
        PageHeader {
            point_count,
            start_time,
            end_time,
            statistics,
        },
        reader.position(),
    ))
}

/// Verifies and decodes a page body, decoding only the columns flagged in
/// `wanted`.
pub fn decode(body: &[u8], layout: &PageLayout, wanted: &[bool]) -> Result<DecodedPage> {
    let payload_len = body.len().checked_sub(4).ok_or(TsFileError::Truncated {
        needed: 4,
        remaining: body.len(),
    })?;
    let (payload, crc_bytes) = body.split_at(payload_len);
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(TsFileError::ChecksumMismatch { expected, actual });
    }

    let (header, header_len) = read_header(payload, layout)?;
    let point_count = header.point_count as usize;
    let mut reader = ByteReader::new(&payload[header_len..]);

    let raw_times = read_stream(&mut reader, layout.time_compression)?;
    let timestamps = match encoding::decode(
        &raw_times,
        TSDataType::Int64,
        layout.time_encoding,
        point_count,
        &EncodingParams::default(),
    )? {
        ColumnData::Int64(c) => c.into_values(),
        other => {
            return Err(TsFileError::TypeMismatch {
                expected: TSDataType::Int64,
                actual: other.data_type(),
            })
        }
    };

    let mut columns = Vec::with_capacity(layout.columns.len());
    for (i, column) in layout.columns.iter().enumerate() {
        if !wanted.get(i).copied().unwrap_or(false) {
            skip_stream(&mut reader)?;
            columns.push(None);
            continue;
        }
        let raw = read_stream(&mut reader, column.compression)?;
        let params = column.encoding_params()?;
        let (present, encoded, expected_len) = if layout.aligned {
            let bitmap_len = point_count.div_ceil(8);
            if raw.len() < bitmap_len {
                return Err(TsFileError::Truncated {
                    needed: bitmap_len,
                    remaining: raw.len(),
                });
            }
            let mut bits = BitVec::<u8, Msb0>::from_slice(&raw[..bitmap_len]);
            bits.truncate(point_count);
            let count = bits.count_ones();
            (Some(bits), &raw[bitmap_len..], count)
        } else {
            (None, &raw[..], point_count)
        };

        let values = encoding::decode(encoded, column.data_type, column.encoding, expected_len, &params)?;
        if values.len() != expected_len {
            return Err(TsFileError::ColumnAlignment {
                expected: expected_len,
                actual: values.len(),
            });
        }
        columns.push(Some(PageColumn { present, values }));
    }

    if !reader.is_empty() {
        return Err(TsFileError::CodecMismatch(format!(
            "{} trailing bytes in page",
            reader.remaining()
        )));
    }

    Ok(DecodedPage {
        header,
        timestamps,
        columns,
    })
}

fn read_stream(reader: &mut ByteReader<'_>, compression: CompressionType) -> Result<Vec<u8>> {
    let uncompressed_len = reader.read_u32()? as usize;
    let compressed_len = reader.read_u32()? as usize;
    let compressed = reader.take(compressed_len)?;
    compressor_for(compression)?.decompress(compressed, uncompressed_len)
}

fn skip_stream(reader: &mut ByteReader<'_>) -> Result<()> {
    let _uncompressed_len = reader.read_u32()?;
    let compressed_len = reader.read_u32()? as usize;
    reader.take(compressed_len)?;
    Ok(())
}
