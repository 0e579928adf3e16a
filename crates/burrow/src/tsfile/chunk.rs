//! Chunks: a header followed by the pages of one measurement, or of every
//! measurement of an aligned device.
//!
//! ## Layout
//!
//! ```text
//! header_len    u32
//! marker        u8    0x01 single, 0x02 aligned
//! column_count  u16
//! columns       measurement descriptors
//! time_encoding u8
//! time_comp     u8
//! page_count    u32
//! point_count   u64
//! start_time    i64
//! end_time      i64
//! statistics    one per column
//! data_size     u64   bytes of pages that follow the header
//! pages         ...
//! ```

use crate::config::TsFileConfig;
use crate::error::{Result, TsFileError};
use crate::io::{ByteReader, TsFileInput};
use crate::schema::MeasurementSchema;
use crate::statistics::Statistics;
use crate::tsfile::page::{self, DecodedPage, PageHeader, PageLayout, PageWriter};
use crate::types::{CompressionType, TSEncoding, TimeRange, Timestamp, Value};
use std::io::Write;
use std::sync::Arc;

/// Whether a chunk holds one measurement or an aligned column set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkShape {
    /// One measurement with its own time column.
    Single = 0x01,
    /// Several measurements sharing one time column.
    Aligned = 0x02,
}

impl ChunkShape {
    /// Creates a ChunkShape from its marker byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Single),
            0x02 => Some(Self::Aligned),
            _ => None,
        }
    }
}

/// Chunk header.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    /// Single or aligned.
    pub shape: ChunkShape,
    /// Value columns.
    pub columns: Vec<MeasurementSchema>,
    /// Time column encoding.
    pub time_encoding: TSEncoding,
    /// Time column compression.
    pub time_compression: CompressionType,
    /// Number of pages.
    pub page_count: u32,
    /// Number of timestamps over all pages.
    pub point_count: u64,
    /// First timestamp.
    pub start_time: Timestamp,
    /// Last timestamp.
    pub end_time: Timestamp,
    /// Statistics per column.
    pub statistics: Vec<Statistics>,
    /// Size of the page data in bytes.
    pub data_size: u64,
}

impl ChunkHeader {
    /// Page layout of the chunk.
    pub fn layout(&self) -> PageLayout {
        PageLayout {
            aligned: self.shape == ChunkShape::Aligned,
            time_encoding: self.time_encoding,
            time_compression: self.time_compression,
            columns: self.columns.clone(),
        }
    }

    /// Position of a column by measurement name.
    pub fn column_index(&self, measurement: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == measurement)
    }

    /// Serializes the header with its length prefix.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::new();
        buf.push(self.shape as u8);
        buf.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        for column in &self.columns {
            column.write_to(&mut buf)?;
        }
        buf.push(self.time_encoding as u8);
        buf.push(self.time_compression as u8);
        buf.extend_from_slice(&self.page_count.to_le_bytes());
        buf.extend_from_slice(&self.point_count.to_le_bytes());
        buf.extend_from_slice(&self.start_time.to_le_bytes());
        buf.extend_from_slice(&self.end_time.to_le_bytes());
        for stats in &self.statistics {
            stats.write_to(&mut buf)?;
        }
        buf.extend_from_slice(&self.data_size.to_le_bytes());

        writer.write_all(&(buf.len() as u32).to_le_bytes())?;
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Parses a header body (the bytes after the length prefix).
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let marker = reader.read_u8()?;
        let shape = ChunkShape::from_u8(marker)
            .ok_or_else(|| TsFileError::CodecMismatch(format!("invalid chunk marker 0x{:02x}", marker)))?;
        let column_count = reader.read_u16()? as usize;
        if shape == ChunkShape::Single && column_count != 1 {
            return Err(TsFileError::CodecMismatch(format!(
                "single chunk declares {} columns",
                column_count
            )));
        }
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(MeasurementSchema::read_from(reader)?);
        }
        let raw_encoding = reader.read_u8()?;
        let time_encoding =
            TSEncoding::from_u8(raw_encoding).ok_or(TsFileError::UnknownEncodingId(raw_encoding))?;
        let raw_compression = reader.read_u8()?;
        let time_compression = CompressionType::from_u8(raw_compression)
            .ok_or(TsFileError::UnknownCompressionId(raw_compression))?;
        let page_count = reader.read_u32()?;
        let point_count = reader.read_u64()?;
        let start_time = reader.read_i64()?;
        let end_time = reader.read_i64()?;
        let mut statistics = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            statistics.push(Statistics::read_from(reader)?);
        }
        let data_size = reader.read_u64()?;

        Ok(Self {
            shape,
            columns,
            time_encoding,
            time_compression,
            page_count,
            point_count,
            start_time,
            end_time,
            statistics,
            data_size,
        })
    }

    /// Reads the header of the chunk starting at `offset`. Returns the
    /// header and the offset of its first page.
    pub fn read_at(input: &dyn TsFileInput, offset: u64) -> Result<(Self, u64)> {
        let header_len = read_len_prefix(input, offset)?;
        let body = input.read_vec(offset + 4, header_len as usize)?;
        let mut reader = ByteReader::new(&body);
        let header = Self::read_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(TsFileError::CodecMismatch(format!(
                "{} trailing bytes in chunk header",
                reader.remaining()
            )));
        }
        Ok((header, offset + 4 + header_len as u64))
    }
}

/// End of the pages of a chunk whose data starts at `data_offset`. The
/// pages must fit inside the input.
pub(crate) fn data_end(input: &dyn TsFileInput, data_offset: u64, data_size: u64) -> Result<u64> {
    let size = input.size()?;
    let remaining = size.saturating_sub(data_offset);
    match data_offset.checked_add(data_size) {
        Some(end) if end <= size => Ok(end),
        _ => Err(TsFileError::Truncated {
            needed: usize::try_from(data_size).unwrap_or(usize::MAX),
            remaining: usize::try_from(remaining).unwrap_or(usize::MAX),
        }),
    }
}

fn read_len_prefix(input: &dyn TsFileInput, offset: u64) -> Result<u32> {
    let bytes = input.read_vec(offset, 4)?;
    ByteReader::new(&bytes).read_u32()
}

/// A finished chunk.
#[derive(Debug, Clone)]
pub struct SealedChunk {
    /// Header as written.
    pub header: ChunkHeader,
    /// Serialized header and pages.
    pub bytes: Vec<u8>,
}

/// Buffers points into pages of at most `max_points_per_page` timestamps.
pub struct ChunkWriter {
    shape: ChunkShape,
    max_points_per_page: usize,
    page: PageWriter,
    pages: Vec<u8>,
    page_count: u32,
    point_count: u64,
    start_time: Timestamp,
    end_time: Timestamp,
    statistics: Vec<Statistics>,
}

impl ChunkWriter {
    /// Creates a writer for one measurement.
    pub fn single(column: MeasurementSchema, config: &TsFileConfig) -> Result<Self> {
        Self::new(ChunkShape::Single, vec![column], config)
    }

    /// Creates a writer for an aligned column set.
    pub fn aligned(columns: Vec<MeasurementSchema>, config: &TsFileConfig) -> Result<Self> {
        Self::new(ChunkShape::Aligned, columns, config)
    }

    fn new(shape: ChunkShape, columns: Vec<MeasurementSchema>, config: &TsFileConfig) -> Result<Self> {
        let statistics = columns.iter().map(|c| Statistics::new(c.data_type)).collect();
        let page = PageWriter::new(PageLayout {
            aligned: shape == ChunkShape::Aligned,
            time_encoding: config.time_encoding,
            time_compression: config.time_compression,
            columns,
        })?;
        Ok(Self {
            shape,
            max_points_per_page: config.max_points_per_page.max(1),
            page,
            pages: Vec::new(),
            page_count: 0,
            point_count: 0,
            start_time: Timestamp::MAX,
            end_time: Timestamp::MIN,
            statistics,
        })
    }

    /// Value columns of the chunk.
    pub fn columns(&self) -> &[MeasurementSchema] {
        &self.page.layout().columns
    }

    /// Number of buffered timestamps, sealed pages included.
    pub fn point_count(&self) -> u64 {
        self.point_count + self.page.point_count() as u64
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    /// Sealed page bytes plus the estimate of the open page.
    pub fn estimated_size(&self) -> usize {
        self.pages.len() + self.page.estimated_size()
    }

    /// Writes one timestamp, sealing the open page when it is full.
    pub fn write(&mut self, timestamp: Timestamp, values: &[Option<&Value>]) -> Result<()> {
        self.page.write(timestamp, values)?;
        if self.page.point_count() >= self.max_points_per_page {
            self.seal_page()?;
        }
        Ok(())
    }

    fn seal_page(&mut self) -> Result<()> {
        if self.page.is_empty() {
            return Ok(());
        }
        let sealed = self.page.seal()?;
        for (total, stats) in self.statistics.iter_mut().zip(&sealed.statistics) {
            total.merge(stats)?;
        }
        self.start_time = self.start_time.min(sealed.start_time);
        self.end_time = self.end_time.max(sealed.end_time);
        self.point_count += sealed.point_count as u64;
        self.page_count += 1;
        self.pages.extend_from_slice(&sealed.bytes);
        Ok(())
    }

    /// Seals the open page and serializes the chunk. The writer keeps its
    /// pages, so a failed write of the result loses nothing.
    pub fn finish(&mut self) -> Result<SealedChunk> {
        self.seal_page()?;
        let layout = self.page.layout();
        let header = ChunkHeader {
            shape: self.shape,
            columns: layout.columns.clone(),
            time_encoding: layout.time_encoding,
            time_compression: layout.time_compression,
            page_count: self.page_count,
            point_count: self.point_count,
            start_time: self.start_time,
            end_time: self.end_time,
            statistics: self.statistics.clone(),
            data_size: self.pages.len() as u64,
        };
        let mut bytes = Vec::with_capacity(self.pages.len() + 256);
        header.write_to(&mut bytes)?;
        bytes.extend_from_slice(&self.pages);
        Ok(SealedChunk { header, bytes })
    }
}

/// Reads the pages of one chunk on demand.
pub struct ChunkReader {
    input: Arc<dyn TsFileInput>,
    header: ChunkHeader,
    layout: PageLayout,
    wanted: Vec<bool>,
    range: TimeRange,
    next_offset: u64,
    end_offset: u64,
    pages_read: u32,
}

impl ChunkReader {
    /// Opens the chunk at `offset`, decoding only the columns named in
    /// `measurements` and only the pages overlapping `range`.
    pub fn open(
        input: Arc<dyn TsFileInput>,
        offset: u64,
        measurements: &[&str],
        range: TimeRange,
    ) -> Result<Self> {
        let (header, data_offset) = ChunkHeader::read_at(input.as_ref(), offset)?;
        let wanted = header
            .columns
            .iter()
            .map(|c| measurements.contains(&c.name.as_str()))
            .collect();
        let layout = header.layout();
        let end_offset = data_end(input.as_ref(), data_offset, header.data_size)?;
        Ok(Self {
            input,
            header,
            layout,
            wanted,
            range,
            next_offset: data_offset,
            end_offset,
            pages_read: 0,
        })
    }

    /// The chunk header.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Decodes the next page overlapping the time range, or `None` once the
    /// chunk is exhausted.
    pub fn next_page(&mut self) -> Result<Option<DecodedPage>> {
        while self.next_offset < self.end_offset {
            let page_len = read_len_prefix(self.input.as_ref(), self.next_offset)? as u64;
            let body_offset = self.next_offset + 4;
            if page_len > self.end_offset.saturating_sub(body_offset) {
                return Err(TsFileError::Truncated {
                    needed: page_len as usize,
                    remaining: self.end_offset.saturating_sub(body_offset) as usize,
                });
            }
            let body = self.input.read_vec(body_offset, page_len as usize)?;
            self.next_offset = body_offset + page_len;
            self.pages_read += 1;

            let (header, _) = page::read_header(&body, &self.layout)?;
            if !self.range.overlaps(header.start_time, header.end_time) {
                continue;
            }
            return page::decode(&body, &self.layout, &self.wanted).map(Some);
        }
        if self.pages_read != self.header.page_count {
            return Err(TsFileError::CodecMismatch(format!(
                "chunk declares {} pages, found {}",
                self.header.page_count, self.pages_read
            )));
        }
        Ok(None)
    }

    /// Reads every page header without decoding the streams.
    pub fn page_headers(&self) -> Result<Vec<PageHeader>> {
        let mut headers = Vec::with_capacity(self.header.page_count as usize);
        let mut offset = self.end_offset - self.header.data_size;
        while offset < self.end_offset {
            let page_len = read_len_prefix(self.input.as_ref(), offset)? as u64;
            let body_offset = offset + 4;
            if page_len > self.end_offset.saturating_sub(body_offset) {
                return Err(TsFileError::Truncated {
                    needed: page_len as usize,
                    remaining: self.end_offset.saturating_sub(body_offset) as usize,
                });
            }
            let body = self.input.read_vec(body_offset, page_len as usize)?;
            headers.push(page::read_header(&body, &self.layout)?.0);
            offset = body_offset + page_len;
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryInput;
    use crate::types::TSDataType;

    fn config(points: usize) -> TsFileConfig {
        TsFileConfig::default().with_max_points_per_page(points)
    }

    fn open(chunk: &SealedChunk, measurements: &[&str], range: TimeRange) -> ChunkReader {
        let input: Arc<dyn TsFileInput> = Arc::new(MemoryInput::from(chunk.bytes.clone()));
        ChunkReader::open(input, 0, measurements, range).unwrap()
    }

    #[test]
    fn test_pages_split_at_limit() {
        let mut writer = ChunkWriter::single(MeasurementSchema::new("s1", TSDataType::Int64), &config(10)).unwrap();
        for ts in 0..25i64 {
            writer.write(ts, &[Some(&Value::Int64(ts * 2))]).unwrap();
        }
        assert_eq!(writer.point_count(), 25);
        let chunk = writer.finish().unwrap();
        assert_eq!(chunk.header.page_count, 3);
        assert_eq!(chunk.header.point_count, 25);
        assert_eq!((chunk.header.start_time, chunk.header.end_time), (0, 24));
        assert_eq!(chunk.header.statistics[0].max, Some(Value::Int64(48)));

        let mut reader = open(&chunk, &["s1"], TimeRange::all());
        assert_eq!(reader.header(), &chunk.header);
        let mut timestamps = Vec::new();
        while let Some(page) = reader.next_page().unwrap() {
            timestamps.extend(page.timestamps);
        }
        assert_eq!(timestamps, (0..25).collect::<Vec<_>>());
        assert_eq!(reader.page_headers().unwrap().len(), 3);
    }

    #[test]
    fn test_pages_outside_range_skipped() {
        let mut writer = ChunkWriter::single(MeasurementSchema::new("s1", TSDataType::Int32), &config(10)).unwrap();
        for ts in 0..30i64 {
            writer.write(ts, &[Some(&Value::Int32(ts as i32))]).unwrap();
        }
        let chunk = writer.finish().unwrap();

        let mut reader = open(&chunk, &["s1"], TimeRange::new(12, 15));
        let page = reader.next_page().unwrap().unwrap();
        assert_eq!(page.timestamps.first(), Some(&10));
        assert!(reader.next_page().unwrap().is_none());
    }

    #[test]
    fn test_aligned_chunk_header_roundtrip() {
        let columns = vec![
            MeasurementSchema::new("a", TSDataType::Float),
            MeasurementSchema::new("b", TSDataType::Boolean).with_encoding(TSEncoding::Rle),
        ];
        let mut writer = ChunkWriter::aligned(columns.clone(), &config(4)).unwrap();
        writer.write(1, &[Some(&Value::Float(1.5)), None]).unwrap();
        writer.write(2, &[None, Some(&Value::Boolean(true))]).unwrap();
        let chunk = writer.finish().unwrap();

        let input = MemoryInput::from(chunk.bytes.clone());
        let (header, data_offset) = ChunkHeader::read_at(&input, 0).unwrap();
        assert_eq!(header.shape, ChunkShape::Aligned);
        assert_eq!(header.columns, columns);
        assert_eq!(header.statistics[0].count, 1);
        assert_eq!(header.statistics[1].count, 1);
        assert_eq!(data_offset + header.data_size, chunk.bytes.len() as u64);
    }

    #[test]
    fn test_empty_chunk() {
        let mut writer = ChunkWriter::single(MeasurementSchema::new("s1", TSDataType::Text), &config(4)).unwrap();
        assert!(writer.is_empty());
        let chunk = writer.finish().unwrap();
        assert_eq!(chunk.header.page_count, 0);
        let mut reader = open(&chunk, &["s1"], TimeRange::all());
        assert!(reader.next_page().unwrap().is_none());
    }

    #[test]
    fn test_invalid_marker_rejected() {
        let mut writer = ChunkWriter::single(MeasurementSchema::new("s1", TSDataType::Int32), &config(4)).unwrap();
        let mut bytes = writer.finish().unwrap().bytes;
        bytes[4] = 0x07;
        let input = MemoryInput::from(bytes);
        assert!(ChunkHeader::read_at(&input, 0).is_err());
    }

    /// Chunk bytes with `data_size` overwritten.
    fn with_data_size(chunk: &SealedChunk, data_size: u64) -> Arc<dyn TsFileInput> {
        let mut bytes = chunk.bytes.clone();
        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let at = 4 + header_len - 8;
        bytes[at..at + 8].copy_from_slice(&data_size.to_le_bytes());
        Arc::new(MemoryInput::from(bytes))
    }

    #[test]
    fn test_data_size_bounded_by_input() {
        let mut writer = ChunkWriter::single(MeasurementSchema::new("s1", TSDataType::Int64), &config(4)).unwrap();
        for ts in 0..10i64 {
            writer.write(ts, &[Some(&Value::Int64(ts))]).unwrap();
        }
        let chunk = writer.finish().unwrap();
        // Sealing leaves the buffered pages in place.
        assert_eq!(writer.point_count(), 10);

        for data_size in [u64::MAX, chunk.header.data_size + 1] {
            let input = with_data_size(&chunk, data_size);
            let err = ChunkReader::open(input, 0, &["s1"], TimeRange::all()).err().unwrap();
            assert!(matches!(err, TsFileError::Truncated { .. }), "{:?}", err);
        }

        // A page running past the end of its chunk.
        let input = with_data_size(&chunk, 8);
        let mut reader = ChunkReader::open(input, 0, &["s1"], TimeRange::all()).unwrap();
        assert!(matches!(reader.page_headers(), Err(TsFileError::Truncated { .. })));
        assert!(matches!(reader.next_page(), Err(TsFileError::Truncated { .. })));
    }
}
