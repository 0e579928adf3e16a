//! File writer: schema registration, device routing, flush policy and footer.

use crate::config::TsFileConfig;
use crate::error::{Result, TsFileError};
use crate::io::{LocalFileOutput, TsFileOutput};
use crate::record::{Tablet, TsRecord};
use crate::schema::{DeviceSchema, MeasurementSchema, Schema};
use crate::tsfile::chunk_group::{ChunkGroupWriter, FlushedGroup};
use crate::tsfile::metadata::{MetadataIndex, MAGIC, VERSION};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// What [`TsFileWriter::close`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsFileSummary {
    /// Devices with at least one chunk.
    pub device_count: usize,
    /// Chunk groups written.
    pub chunk_group_count: usize,
    /// Timestamps written over all chunks.
    pub point_count: u64,
    /// Offset of the footer.
    pub footer_offset: u64,
    /// Total file size.
    pub file_size: u64,
}

/// Writes one file. Calls must be serialized by the caller.
///
/// Data is buffered per device and flushed as a chunk group whenever a
/// device's buffered size reaches [`TsFileConfig::group_size_threshold`].
/// [`close`](Self::close) flushes the rest and writes the footer; a file
/// that was never closed has no footer and cannot be opened.
pub struct TsFileWriter<W: TsFileOutput = LocalFileOutput> {
    out: W,
    config: TsFileConfig,
    schema: Schema,
    groups: BTreeMap<String, ChunkGroupWriter>,
    flushed: Vec<FlushedGroup>,
    closed: bool,
}

impl TsFileWriter<LocalFileOutput> {
    /// Creates (or truncates) a file at `path`.
    pub fn create(path: impl AsRef<Path>, config: TsFileConfig) -> Result<Self> {
        Self::new(LocalFileOutput::create(path)?, config)
    }
}

impl<W: TsFileOutput> TsFileWriter<W> {
    /// Starts a file on `out`, writing the magic and version.
    pub fn new(mut out: W, config: TsFileConfig) -> Result<Self> {
        out.write_all(&MAGIC)?;
        out.write_all(&[VERSION])?;
        Ok(Self {
            out,
            config,
            schema: Schema::new(),
            groups: BTreeMap::new(),
            flushed: Vec::new(),
            closed: false,
        })
    }

    /// Writer configuration.
    pub fn config(&self) -> &TsFileConfig {
        &self.config
    }

    /// Registered schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The underlying output.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TsFileError::WriterClosed);
        }
        Ok(())
    }

    /// Registers one measurement on a non-aligned device.
    pub fn register_timeseries(&mut self, device_id: &str, measurement: MeasurementSchema) -> Result<()> {
        self.ensure_open()?;
        self.schema.register_timeseries(device_id, measurement)?;
        Ok(())
    }

    /// Registers measurements on an aligned device.
    pub fn register_aligned_timeseries(
        &mut self,
        device_id: &str,
        measurements: Vec<MeasurementSchema>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.schema.register_aligned(device_id, measurements)?;
        Ok(())
    }

    /// Registers every measurement of a device.
    pub fn register_device(&mut self, device: DeviceSchema) -> Result<()> {
        self.ensure_open()?;
        self.schema.register_device(device)?;
        Ok(())
    }

    /// Writes the rows of a tablet. On error nothing from the tablet is kept.
    pub fn write_tablet(&mut self, tablet: &Tablet) -> Result<()> {
        self.ensure_open()?;
        let device_id = tablet.device_id();
        let device = self
            .schema
            .device(device_id)
            .ok_or_else(|| TsFileError::UnknownDevice(device_id.to_string()))?;
        let group = group_for(&mut self.groups, &mut self.out, &mut self.flushed, device, &self.config)?;
        group.write_tablet(tablet, device)?;
        self.flush_if_full(device_id)
    }

    /// Writes one record.
    pub fn write_record(&mut self, record: &TsRecord) -> Result<()> {
        self.ensure_open()?;
        let device_id = record.device_id.as_str();
        let device = self
            .schema
            .device(device_id)
            .ok_or_else(|| TsFileError::UnknownDevice(device_id.to_string()))?;
        let group = group_for(&mut self.groups, &mut self.out, &mut self.flushed, device, &self.config)?;
        group.write_record(record, device)?;
        self.flush_if_full(device_id)
    }

    fn flush_if_full(&mut self, device_id: &str) -> Result<()> {
        if let Some(group) = self.groups.get_mut(device_id) {
            if group.estimated_size() >= self.config.group_size_threshold {
                flush_group(group, &mut self.out, &mut self.flushed)?;
            }
        }
        Ok(())
    }

    /// Flushes every buffered chunk group to the output.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        for group in self.groups.values_mut() {
            flush_group(group, &mut self.out, &mut self.flushed)?;
        }
        self.out.flush()
    }

    /// Number of chunk groups written so far.
    pub fn chunk_group_count(&self) -> usize {
        self.flushed.len()
    }

    /// Flushes remaining data, writes the footer and trailer, and syncs the
    /// output. Later calls fail with [`TsFileError::WriterClosed`]. If an
    /// output error interrupts it, buffered data is kept and close may be
    /// retried.
    pub fn close(&mut self) -> Result<TsFileSummary> {
        self.ensure_open()?;

        for group in self.groups.values_mut() {
            flush_group(group, &mut self.out, &mut self.flushed)?;
        }

        let index = MetadataIndex::build(&self.flushed)?;
        let footer_offset = self.out.position();
        let mut footer = Vec::new();
        index.write_to(&mut footer)?;
        let crc = crc32fast::hash(&footer);
        footer.extend_from_slice(&crc.to_le_bytes());
        footer.extend_from_slice(&footer_offset.to_le_bytes());
        footer.extend_from_slice(&MAGIC);
        self.out.write_all(&footer)?;
        self.out.sync()?;
        self.closed = true;

        let summary = TsFileSummary {
            device_count: index.devices().count(),
            chunk_group_count: self.flushed.len(),
            point_count: self
                .flushed
                .iter()
                .flat_map(|g| &g.chunks)
                .map(|c| c.header.point_count)
                .sum(),
            footer_offset,
            file_size: self.out.position(),
        };
        debug!(
            "Closed file: {} devices, {} chunk groups, footer at {}",
            summary.device_count, summary.chunk_group_count, footer_offset
        );
        Ok(summary)
    }
}

fn group_for<'a, W: TsFileOutput>(
    groups: &'a mut BTreeMap<String, ChunkGroupWriter>,
    out: &mut W,
    flushed: &mut Vec<FlushedGroup>,
    device: &DeviceSchema,
    config: &TsFileConfig,
) -> Result<&'a mut ChunkGroupWriter> {
    let group = match groups.entry(device.device_id.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(ChunkGroupWriter::new(device, config)?),
    };
    if !group.sync_schema(device)? {
        flush_group(group, out, flushed)?;
        group.sync_schema(device)?;
    }
    Ok(group)
}

fn flush_group<W: TsFileOutput>(
    group: &mut ChunkGroupWriter,
    out: &mut W,
    flushed: &mut Vec<FlushedGroup>,
) -> Result<()> {
    if let Some(done) = group.flush(out)? {
        flushed.push(done);
    }
    Ok(())
}

impl<W: TsFileOutput> Drop for TsFileWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Writer dropped without close; {} buffered chunk groups lost and no footer written",
                self.groups.values().filter(|g| !g.is_empty()).count()
            );
        }
    }
}
