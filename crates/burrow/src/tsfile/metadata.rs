//! Footer metadata index.
//!
//! ## File framing
//!
//! ```text
//! "TsFile" | version u8
//! chunk groups ...
//! footer:  index | crc32 u32
//! trailer: footer_offset u64 | "TsFile"
//! ```
//!
//! ## Index
//!
//! ```text
//! device_count u32
//! device*:     device str | aligned u8 | group_count u32 | group_offset u64*
//!              start_time i64 | end_time i64 | point_count u64
//!              series_count u16 | series*
//! series:      measurement descriptor | statistics | chunk_count u32 | chunk*
//! chunk:       offset u64 | size u64 | statistics
//! bloom filter over "device.measurement"
//! ```

use crate::error::{Result, TsFileError};
use crate::io::{write_str, ByteReader};
use crate::schema::MeasurementSchema;
use crate::statistics::Statistics;
use crate::tsfile::chunk_group::FlushedGroup;
use crate::types::{Path, TimeRange, Timestamp};
use std::collections::BTreeMap;
use std::io::Write;

/// Magic bytes opening and closing every file.
pub const MAGIC: [u8; 6] = *b"TsFile";

/// Current format version.
pub const VERSION: u8 = 4;

/// Size of the magic and version at the head of the file.
pub const HEAD_SIZE: usize = MAGIC.len() + 1;

/// Size of the trailer: footer offset and magic.
pub const TRAILER_SIZE: usize = 8 + MAGIC.len();

/// Default number of hash functions for the Bloom filter.
const BLOOM_FILTER_DEFAULT_HASH_COUNT: u8 = 3;

/// Bloom filter over series paths.
///
/// Uses xxhash64 with k=3 seeds: `h_i(x) = xxhash64(x, seed=i) % size_bits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u8,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at roughly 10 bits per item.
    pub fn new(expected_items: usize) -> Self {
        let num_bits = (expected_items * 10).max(64);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            hash_count: BLOOM_FILTER_DEFAULT_HASH_COUNT,
        }
    }

    fn positions<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (usize, u64)> + 'a {
        let num_bits = (self.bits.len() * 64) as u64;
        (0..self.hash_count).map(move |seed| {
            let bit_idx = xxhash_rust::xxh64::xxh64(key.as_bytes(), seed as u64) % num_bits;
            ((bit_idx / 64) as usize, 1u64 << (bit_idx % 64))
        })
    }

    /// Adds a path.
    pub fn insert(&mut self, key: &str) {
        let positions: Vec<_> = self.positions(key).collect();
        for (word, mask) in positions {
            self.bits[word] |= mask;
        }
    }

    /// Returns false if the path is definitely absent.
    pub fn maybe_contains(&self, key: &str) -> bool {
        self.positions(key).all(|(word, mask)| self.bits[word] & mask != 0)
    }

    /// Writes the filter.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.bits.len() as u32).to_le_bytes())?;
        // Hash count + 3 reserved bytes
        writer.write_all(&[self.hash_count, 0, 0, 0])?;
        for word in &self.bits {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads a filter.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let num_words = reader.read_u32()? as usize;
        let hash_count = reader.read_array::<4>()?[0];
        if num_words == 0 {
            return Err(TsFileError::CorruptFooter("empty bloom filter".to_string()));
        }
        let raw = reader.take(num_words.saturating_mul(8))?;
        let bits = raw
            .chunks_exact(8)
            .map(|w| u64::from_le_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]))
            .collect();
        Ok(Self { bits, hash_count })
    }
}

/// One chunk holding a measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    /// Offset of the chunk.
    pub offset: u64,
    /// Serialized size of the chunk.
    pub size: u64,
    /// Statistics of this measurement within the chunk.
    pub statistics: Statistics,
}

/// Index entry of one measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesMetadata {
    /// Measurement descriptor.
    pub schema: MeasurementSchema,
    /// Statistics over every chunk.
    pub statistics: Statistics,
    /// Chunks in file order.
    pub chunks: Vec<ChunkMetadata>,
}

impl TimeseriesMetadata {
    /// Chunks whose time range overlaps `range`.
    pub fn chunks_in(&self, range: TimeRange) -> impl Iterator<Item = &ChunkMetadata> {
        self.chunks
            .iter()
            .filter(move |c| range.overlaps(c.statistics.start_time, c.statistics.end_time))
    }
}

/// Time span and size of everything stored for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatistics {
    /// Earliest timestamp of any chunk.
    pub start_time: Timestamp,
    /// Latest timestamp of any chunk.
    pub end_time: Timestamp,
    /// Sum of chunk point counts. An aligned chunk counts each timestamp
    /// once; single chunks count per measurement.
    pub point_count: u64,
}

impl DeviceStatistics {
    fn empty() -> Self {
        Self {
            start_time: Timestamp::MAX,
            end_time: Timestamp::MIN,
            point_count: 0,
        }
    }

    /// The inclusive time span.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Index entry of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMetadata {
    /// Device identifier.
    pub device_id: String,
    /// Whether the device is aligned.
    pub aligned: bool,
    /// Offsets of the device's chunk groups.
    pub chunk_group_offsets: Vec<u64>,
    /// Aggregate over the device's chunks.
    pub statistics: DeviceStatistics,
    /// Measurements in registration order.
    pub timeseries: Vec<TimeseriesMetadata>,
}

impl DeviceMetadata {
    /// Looks up a measurement.
    pub fn timeseries(&self, measurement: &str) -> Option<&TimeseriesMetadata> {
        self.timeseries.iter().find(|t| t.schema.name == measurement)
    }
}

/// The whole footer index.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataIndex {
    devices: BTreeMap<String, DeviceMetadata>,
    bloom: BloomFilter,
}

impl MetadataIndex {
    /// Builds the index from the groups flushed during writing.
    pub fn build(groups: &[FlushedGroup]) -> Result<Self> {
        let mut devices: BTreeMap<String, DeviceMetadata> = BTreeMap::new();
        for group in groups {
            let device = devices
                .entry(group.device_id.clone())
                .or_insert_with(|| DeviceMetadata {
                    device_id: group.device_id.clone(),
                    aligned: group.aligned,
                    chunk_group_offsets: Vec::new(),
                    statistics: DeviceStatistics::empty(),
                    timeseries: Vec::new(),
                });
            device.chunk_group_offsets.push(group.offset);

            for chunk in &group.chunks {
                let totals = &mut device.statistics;
                totals.start_time = totals.start_time.min(chunk.header.start_time);
                totals.end_time = totals.end_time.max(chunk.header.end_time);
                totals.point_count += chunk.header.point_count;
                for (column, stats) in chunk.header.columns.iter().zip(&chunk.header.statistics) {
                    // Aligned columns with no value in this chunk add nothing.
                    if stats.is_empty() {
                        continue;
                    }
                    let position = match device.timeseries.iter().position(|t| t.schema.name == column.name) {
                        Some(position) => position,
                        None => {
                            device.timeseries.push(TimeseriesMetadata {
                                schema: column.clone(),
                                statistics: Statistics::new(column.data_type),
                                chunks: Vec::new(),
                            });
                            device.timeseries.len() - 1
                        }
                    };
                    let series = &mut device.timeseries[position];
                    series.statistics.merge(stats)?;
                    series.chunks.push(ChunkMetadata {
                        offset: chunk.offset,
                        size: chunk.size,
                        statistics: stats.clone(),
                    });
                }
            }
        }

        let series_count = devices.values().map(|d| d.timeseries.len()).sum();
        let mut bloom = BloomFilter::new(series_count);
        for device in devices.values() {
            for series in &device.timeseries {
                bloom.insert(&Path::new(device.device_id.as_str(), series.schema.name.as_str()).to_string());
            }
        }
        Ok(Self { devices, bloom })
    }

    /// Devices in identifier order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceMetadata> {
        self.devices.values()
    }

    /// Looks up a device.
    pub fn device(&self, device_id: &str) -> Option<&DeviceMetadata> {
        self.devices.get(device_id)
    }

    /// Looks up a series, consulting the Bloom filter first.
    pub fn timeseries(&self, path: &Path) -> Option<&TimeseriesMetadata> {
        if !self.bloom.maybe_contains(&path.to_string()) {
            return None;
        }
        self.devices.get(&path.device)?.timeseries(&path.measurement)
    }

    /// Serializes the index.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.devices.len() as u32).to_le_bytes())?;
        for device in self.devices.values() {
            write_str(writer, &device.device_id)?;
            writer.write_all(&[device.aligned as u8])?;
            writer.write_all(&(device.chunk_group_offsets.len() as u32).to_le_bytes())?;
            for offset in &device.chunk_group_offsets {
                writer.write_all(&offset.to_le_bytes())?;
            }
            writer.write_all(&device.statistics.start_time.to_le_bytes())?;
            writer.write_all(&device.statistics.end_time.to_le_bytes())?;
            writer.write_all(&device.statistics.point_count.to_le_bytes())?;
            writer.write_all(&(device.timeseries.len() as u16).to_le_bytes())?;
            for series in &device.timeseries {
                series.schema.write_to(writer)?;
                series.statistics.write_to(writer)?;
                writer.write_all(&(series.chunks.len() as u32).to_le_bytes())?;
                for chunk in &series.chunks {
                    writer.write_all(&chunk.offset.to_le_bytes())?;
                    writer.write_all(&chunk.size.to_le_bytes())?;
                    chunk.statistics.write_to(writer)?;
                }
            }
        }
        self.bloom.write_to(writer)
    }

    /// Parses an index, requiring every byte to be consumed.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let device_count = reader.read_u32()?;
        let mut devices = BTreeMap::new();
        for _ in 0..device_count {
            let device_id = reader.read_str()?;
            let aligned = reader.read_u8()? != 0;
            let group_count = reader.read_u32()?;
            let mut chunk_group_offsets = Vec::new();
            for _ in 0..group_count {
                chunk_group_offsets.push(reader.read_u64()?);
            }
            let statistics = DeviceStatistics {
                start_time: reader.read_i64()?,
                end_time: reader.read_i64()?,
                point_count: reader.read_u64()?,
            };
            let series_count = reader.read_u16()?;
            let mut timeseries = Vec::with_capacity(series_count as usize);
            for _ in 0..series_count {
                let schema = MeasurementSchema::read_from(reader)?;
                let statistics = Statistics::read_from(reader)?;
                let chunk_count = reader.read_u32()?;
                let mut chunks = Vec::new();
                for _ in 0..chunk_count {
                    chunks.push(ChunkMetadata {
                        offset: reader.read_u64()?,
                        size: reader.read_u64()?,
                        statistics: Statistics::read_from(reader)?,
                    });
                }
                timeseries.push(TimeseriesMetadata {
                    schema,
                    statistics,
                    chunks,
                });
            }
            devices.insert(
                device_id.clone(),
                DeviceMetadata {
                    device_id,
                    aligned,
                    chunk_group_offsets,
                    statistics,
                    timeseries,
                },
            );
        }
        let bloom = BloomFilter::read_from(reader)?;
        if !reader.is_empty() {
            return Err(TsFileError::CorruptFooter(format!(
                "{} trailing bytes after index",
                reader.remaining()
            )));
        }
        Ok(Self { devices, bloom })
    }
}
