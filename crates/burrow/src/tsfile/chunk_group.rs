//! Chunk groups: every chunk of one device flushed together.
//!
//! A group is `0x00 | device (u16 len + utf8) | aligned u8 | chunk_count u32`
//! followed by its chunks in registration order. Non-aligned devices get one
//! chunk per measurement with data; aligned devices get a single chunk that
//! carries every column.

use crate::config::TsFileConfig;
use crate::encoding;
use crate::error::{Result, TsFileError};
use crate::io::{write_str, ByteReader, TsFileInput, TsFileOutput};
use crate::record::{Tablet, TsRecord};
use crate::schema::{DeviceSchema, MeasurementSchema};
use crate::tsfile::chunk::{self, ChunkHeader, ChunkWriter};
use crate::types::{Timestamp, Value};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Marker byte opening a chunk group.
pub const CHUNK_GROUP_MARKER: u8 = 0x00;

/// Chunk group header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGroupHeader {
    /// Device the chunks belong to.
    pub device_id: String,
    /// Whether the device is aligned.
    pub aligned: bool,
    /// Number of chunks that follow.
    pub chunk_count: u32,
}

impl ChunkGroupHeader {
    /// Serializes the header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[CHUNK_GROUP_MARKER])?;
        write_str(writer, &self.device_id)?;
        writer.write_all(&[self.aligned as u8])?;
        writer.write_all(&self.chunk_count.to_le_bytes())?;
        Ok(())
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        1 + 2 + self.device_id.len() + 1 + 4
    }

    /// Parses a header.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let marker = reader.read_u8()?;
        if marker != CHUNK_GROUP_MARKER {
            return Err(TsFileError::CodecMismatch(format!(
                "invalid chunk group marker 0x{:02x}",
                marker
            )));
        }
        let device_id = reader.read_str()?;
        let aligned = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(TsFileError::CodecMismatch(format!(
                    "invalid aligned flag {}",
                    other
                )))
            }
        };
        let chunk_count = reader.read_u32()?;
        Ok(Self {
            device_id,
            aligned,
            chunk_count,
        })
    }
}

/// Where a flushed chunk landed.
#[derive(Debug, Clone)]
pub struct FlushedChunk {
    /// Offset of the chunk header's length prefix.
    pub offset: u64,
    /// Serialized size of the chunk.
    pub size: u64,
    /// The chunk header.
    pub header: ChunkHeader,
}

/// Bookkeeping of one flushed chunk group, consumed by the metadata index.
#[derive(Debug, Clone)]
pub struct FlushedGroup {
    /// Device identifier.
    pub device_id: String,
    /// Whether the device is aligned.
    pub aligned: bool,
    /// Offset of the group header.
    pub offset: u64,
    /// Chunks in write order.
    pub chunks: Vec<FlushedChunk>,
}

/// Buffers the chunks of one device between flushes.
pub struct ChunkGroupWriter {
    device_id: String,
    aligned: bool,
    config: TsFileConfig,
    chunks: Vec<ChunkWriter>,
    /// Last timestamp written per chunk, kept across flushes.
    last_times: Vec<Option<Timestamp>>,
}

impl ChunkGroupWriter {
    /// Creates a writer for the device's current measurements.
    pub fn new(device: &DeviceSchema, config: &TsFileConfig) -> Result<Self> {
        let mut writer = Self {
            device_id: device.device_id.clone(),
            aligned: device.aligned,
            config: config.clone(),
            chunks: Vec::new(),
            last_times: Vec::new(),
        };
        writer.sync_schema(device)?;
        Ok(writer)
    }

    /// Device identifier.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Approximate size of everything buffered.
    pub fn estimated_size(&self) -> usize {
        self.chunks.iter().map(ChunkWriter::estimated_size).sum()
    }

    /// Number of buffered timestamps over all chunks.
    pub fn point_count(&self) -> u64 {
        self.chunks.iter().map(ChunkWriter::point_count).sum()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(ChunkWriter::is_empty)
    }

    /// Picks up measurements registered since the last call. Returns false
    /// if an aligned column set changed while data is buffered, in which
    /// case the group must be flushed and synced again.
    pub fn sync_schema(&mut self, device: &DeviceSchema) -> Result<bool> {
        if self.aligned {
            let current = self.chunks.first().map(ChunkWriter::columns);
            if current == Some(&device.measurements[..]) {
                return Ok(true);
            }
            if !self.is_empty() {
                return Ok(false);
            }
            self.chunks = vec![ChunkWriter::aligned(device.measurements.clone(), &self.config)?];
            self.last_times.resize(1, None);
            return Ok(true);
        }

        for measurement in device.measurements.iter().skip(self.chunks.len()) {
            self.chunks.push(ChunkWriter::single(measurement.clone(), &self.config)?);
            self.last_times.push(None);
        }
        Ok(true)
    }

    /// Buffers the written rows of a tablet. Nothing is buffered unless the
    /// whole tablet is valid.
    pub fn write_tablet(&mut self, tablet: &Tablet, device: &DeviceSchema) -> Result<()> {
        tablet.validate_rows()?;
        let positions = tablet
            .schemas()
            .iter()
            .map(|column| self.resolve(device, &column.name, Some(column)))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(tablet.row_count());
        for row in 0..tablet.row_count() {
            let timestamp = tablet.timestamp(row).ok_or(TsFileError::MissingTimestamp(row))?;
            let mut values = vec![None; device.measurements.len()];
            for (column, &position) in positions.iter().enumerate() {
                values[position] = tablet.value(row, column);
            }
            rows.push((timestamp, values));
        }
        self.write_rows(device, rows)
    }

    /// Buffers one record.
    pub fn write_record(&mut self, record: &TsRecord, device: &DeviceSchema) -> Result<()> {
        let mut values = vec![None; device.measurements.len()];
        for field in &record.fields {
            let position = self.resolve(device, &field.measurement, None)?;
            if values[position].is_some() {
                return Err(TsFileError::InvalidParameter {
                    key: "measurement".to_string(),
                    value: field.measurement.clone(),
                });
            }
            values[position] = Some(field.value.clone());
        }
        self.write_rows(device, vec![(record.timestamp, values)])
    }

    fn resolve(&self, device: &DeviceSchema, name: &str, declared: Option<&MeasurementSchema>) -> Result<usize> {
        let position = device
            .index_of(name)
            .ok_or_else(|| TsFileError::UnknownMeasurement {
                device: self.device_id.clone(),
                measurement: name.to_string(),
            })?;
        if let Some(declared) = declared {
            let registered = &device.measurements[position];
            if declared.data_type != registered.data_type {
                return Err(TsFileError::TypeMismatch {
                    expected: registered.data_type,
                    actual: declared.data_type,
                });
            }
        }
        Ok(position)
    }

    /// Validates every row, then buffers them. `values` is indexed by
    /// measurement registration order.
    fn write_rows(&mut self, device: &DeviceSchema, rows: Vec<(Timestamp, Vec<Option<Value>>)>) -> Result<()> {
        if !self.sync_schema(device)? {
            return Err(TsFileError::SchemaConflict {
                device: self.device_id.clone(),
                measurement: String::new(),
                reason: "aligned columns changed while data is buffered".to_string(),
            });
        }
        let params = device
            .measurements
            .iter()
            .map(MeasurementSchema::encoding_params)
            .collect::<Result<Vec<_>>>()?;

        let mut last_times = self.last_times.clone();
        for (timestamp, values) in &rows {
            for ((value, measurement), params) in values.iter().zip(&device.measurements).zip(&params) {
                if let Some(value) = value {
                    if value.data_type() != measurement.data_type {
                        return Err(TsFileError::TypeMismatch {
                            expected: measurement.data_type,
                            actual: value.data_type(),
                        });
                    }
                    encoding::check_value(value, measurement.encoding, params)?;
                }
            }

            let touched: Vec<usize> = if self.aligned {
                if values.iter().any(Option::is_some) {
                    vec![0]
                } else {
                    Vec::new()
                }
            } else {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_some())
                    .map(|(i, _)| i)
                    .collect()
            };
            for chunk in touched {
                if let Some(last) = last_times[chunk] {
                    if *timestamp < last {
                        let series = if self.aligned {
                            self.device_id.clone()
                        } else {
                            format!("{}.{}", self.device_id, device.measurements[chunk].name)
                        };
                        return Err(TsFileError::OutOfOrderTimestamp {
                            series,
                            timestamp: *timestamp,
                            last,
                        });
                    }
                }
                last_times[chunk] = Some(*timestamp);
            }
        }

        for (timestamp, values) in &rows {
            if self.aligned {
                if values.iter().all(Option::is_none) {
                    continue;
                }
                let refs: Vec<Option<&Value>> = values.iter().map(Option::as_ref).collect();
                self.chunks[0].write(*timestamp, &refs)?;
            } else {
                for (chunk, value) in self.chunks.iter_mut().zip(values) {
                    if let Some(value) = value {
                        chunk.write(*timestamp, &[Some(value)])?;
                    }
                }
            }
        }
        self.last_times = last_times;
        Ok(())
    }

    /// Seals every non-empty chunk and appends the group to `out` in a
    /// single write. Returns `None` if nothing was buffered. If the write
    /// fails the buffered points stay in place and no group is reported.
    pub fn flush(&mut self, out: &mut dyn TsFileOutput) -> Result<Option<FlushedGroup>> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut sealed = Vec::new();
        for (index, chunk) in self.chunks.iter_mut().enumerate() {
            if !chunk.is_empty() {
                sealed.push((index, chunk.finish()?));
            }
        }

        let header = ChunkGroupHeader {
            device_id: self.device_id.clone(),
            aligned: self.aligned,
            chunk_count: sealed.len() as u32,
        };
        let offset = out.position();
        let size = header.serialized_size() + sealed.iter().map(|(_, c)| c.bytes.len()).sum::<usize>();
        let mut buf = Vec::with_capacity(size);
        header.write_to(&mut buf)?;
        let mut chunks = Vec::with_capacity(sealed.len());
        for (_, chunk) in &sealed {
            chunks.push(FlushedChunk {
                offset: offset + buf.len() as u64,
                size: chunk.bytes.len() as u64,
                header: chunk.header.clone(),
            });
            buf.extend_from_slice(&chunk.bytes);
        }
        out.write_all(&buf)?;

        for (index, _) in sealed {
            let chunk = &mut self.chunks[index];
            *chunk = if self.aligned {
                ChunkWriter::aligned(chunk.columns().to_vec(), &self.config)?
            } else {
                ChunkWriter::single(chunk.columns()[0].clone(), &self.config)?
            };
        }

        debug!(
            "Flushed chunk group for {}: {} chunks, {} bytes",
            self.device_id,
            chunks.len(),
            buf.len()
        );

        Ok(Some(FlushedGroup {
            device_id: self.device_id.clone(),
            aligned: self.aligned,
            offset,
            chunks,
        }))
    }
}

/// Walks the chunk headers of one group without decoding pages.
pub struct ChunkGroupReader {
    input: Arc<dyn TsFileInput>,
    header: ChunkGroupHeader,
    next_offset: u64,
    chunks_read: u32,
}

impl ChunkGroupReader {
    /// Opens the group whose header starts at `offset`.
    pub fn open(input: Arc<dyn TsFileInput>, offset: u64) -> Result<Self> {
        // Header length depends on the device id, read its prefix first.
        let prefix = input.read_vec(offset, 3)?;
        let id_len = u16::from_le_bytes([prefix[1], prefix[2]]) as usize;
        let bytes = input.read_vec(offset, 3 + id_len + 1 + 4)?;
        let header = ChunkGroupHeader::read_from(&mut ByteReader::new(&bytes))?;
        let next_offset = offset + header.serialized_size() as u64;
        Ok(Self {
            input,
            header,
            next_offset,
            chunks_read: 0,
        })
    }

    /// The group header.
    pub fn header(&self) -> &ChunkGroupHeader {
        &self.header
    }

    /// Reads the next chunk header, skipping its pages. Returns the chunk
    /// offset with the header.
    pub fn next_chunk(&mut self) -> Result<Option<(u64, ChunkHeader)>> {
        if self.chunks_read == self.header.chunk_count {
            return Ok(None);
        }
        let offset = self.next_offset;
        let (header, data_offset) = ChunkHeader::read_at(self.input.as_ref(), offset)?;
        self.next_offset = chunk::data_end(self.input.as_ref(), data_offset, header.data_size)?;
        self.chunks_read += 1;
        Ok(Some((offset, header)))
    }

    /// Collects the chunks holding any of `measurements`, skipping the rest.
    pub fn find_chunks(&mut self, measurements: &[&str]) -> Result<Vec<(u64, ChunkHeader)>> {
        let mut found = Vec::new();
        while let Some((offset, header)) = self.next_chunk()? {
            if header.columns.iter().any(|c| measurements.contains(&c.name.as_str())) {
                found.push((offset, header));
            }
        }
        Ok(found)
    }

    /// Offset just past the last chunk read so far.
    pub fn end_offset(&self) -> u64 {
        self.next_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryInput, MemoryOutput};
    use crate::types::TSDataType;

    fn device(aligned: bool) -> DeviceSchema {
        DeviceSchema::new("d1", aligned)
            .with_measurement(MeasurementSchema::new("s1", TSDataType::Int32))
            .with_measurement(MeasurementSchema::new("s2", TSDataType::Int64))
    }

    #[test]
    fn test_header_roundtrip() {
        let header = ChunkGroupHeader {
            device_id: "root.sg.d1".to_string(),
            aligned: true,
            chunk_count: 3,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), header.serialized_size());
        assert_eq!(ChunkGroupHeader::read_from(&mut ByteReader::new(&buf)).unwrap(), header);
    }

    #[test]
    fn test_flush_writes_only_chunks_with_data() {
        let device = device(false);
        let mut writer = ChunkGroupWriter::new(&device, &TsFileConfig::default()).unwrap();
        writer
            .write_record(&TsRecord::new("d1", 5).with_field("s2", 50i64), &device)
            .unwrap();
        assert_eq!(writer.point_count(), 1);

        let mut out = MemoryOutput::new();
        let group = writer.flush(&mut out).unwrap().unwrap();
        assert_eq!(group.chunks.len(), 1);
        assert_eq!(group.chunks[0].header.columns[0].name, "s2");
        assert!(writer.is_empty());
        assert!(writer.flush(&mut out).unwrap().is_none());

        let input: Arc<dyn TsFileInput> = Arc::new(MemoryInput::from(out.into_bytes()));
        let mut reader = ChunkGroupReader::open(input, 0).unwrap();
        assert_eq!(reader.header().chunk_count, 1);
        let found = reader.find_chunks(&["s2"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, group.chunks[0].offset);
        assert_eq!(reader.end_offset(), group.chunks[0].offset + group.chunks[0].size);
    }

    #[test]
    fn test_out_of_order_rejected_atomically() {
        let device = device(false);
        let mut writer = ChunkGroupWriter::new(&device, &TsFileConfig::default()).unwrap();
        writer
            .write_record(&TsRecord::new("d1", 10).with_field("s1", 1i32), &device)
            .unwrap();

        let mut tablet = Tablet::new("d1", device.measurements.clone(), 2);
        tablet.add_timestamp(0, 11).unwrap();
        tablet.add_value(0, 1, 5i64).unwrap();
        tablet.add_timestamp(1, 12).unwrap();
        tablet.add_value(1, 0, 0i32).unwrap();
        tablet.add_value(1, 1, 6i64).unwrap();
        writer.write_tablet(&tablet, &device).unwrap();

        let err = writer
            .write_record(
                &TsRecord::new("d1", 11).with_field("s2", 7i64).with_field("s1", 2i32),
                &device,
            )
            .unwrap_err();
        assert!(matches!(err, TsFileError::OutOfOrderTimestamp { timestamp: 11, last: 12, .. }));
        assert_eq!(writer.point_count(), 4);

        // The other measurement's clock is independent.
        writer
            .write_record(&TsRecord::new("d1", 12).with_field("s1", 3i32), &device)
            .unwrap();
    }

    #[test]
    fn test_aligned_skips_empty_rows() {
        let device = device(true);
        let mut writer = ChunkGroupWriter::new(&device, &TsFileConfig::default()).unwrap();
        let mut tablet = Tablet::new("d1", device.measurements.clone(), 3);
        tablet.add_timestamp(0, 1).unwrap();
        tablet.add_value(0, 0, 1i32).unwrap();
        tablet.add_timestamp(1, 2).unwrap();
        tablet.add_timestamp(2, 3).unwrap();
        tablet.add_value(2, 1, 3i64).unwrap();
        writer.write_tablet(&tablet, &device).unwrap();
        assert_eq!(writer.point_count(), 2);

        let mut out = MemoryOutput::new();
        let group = writer.flush(&mut out).unwrap().unwrap();
        assert!(group.aligned);
        assert_eq!(group.chunks.len(), 1);
        assert_eq!(group.chunks[0].header.columns.len(), 2);
        assert_eq!(group.chunks[0].header.point_count, 2);
    }

    #[test]
    fn test_schema_growth() {
        let mut device = device(true);
        let mut writer = ChunkGroupWriter::new(&device, &TsFileConfig::default()).unwrap();
        writer
            .write_record(&TsRecord::new("d1", 1).with_field("s1", 1i32), &device)
            .unwrap();

        device.measurements.push(MeasurementSchema::new("s3", TSDataType::Text));
        assert!(!writer.sync_schema(&device).unwrap());
        writer.flush(&mut MemoryOutput::new()).unwrap();
        assert!(writer.sync_schema(&device).unwrap());
        writer
            .write_record(&TsRecord::new("d1", 2).with_field("s3", "x"), &device)
            .unwrap();
    }

    #[test]
    fn test_unknown_and_mistyped_fields() {
        let device = device(false);
        let mut writer = ChunkGroupWriter::new(&device, &TsFileConfig::default()).unwrap();
        assert!(matches!(
            writer.write_record(&TsRecord::new("d1", 1).with_field("s9", 1i32), &device),
            Err(TsFileError::UnknownMeasurement { .. })
        ));
        assert!(matches!(
            writer.write_record(&TsRecord::new("d1", 1).with_field("s1", 1i64), &device),
            Err(TsFileError::TypeMismatch { .. })
        ));
        assert!(writer
            .write_record(
                &TsRecord::new("d1", 1).with_field("s1", 1i32).with_field("s1", 2i32),
                &device
            )
            .is_err());
        assert!(writer.is_empty());
    }
}
