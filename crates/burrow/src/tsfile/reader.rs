//! File reader: footer validation, path resolution and the time-ordered
//! row merge.

use crate::error::{Result, TsFileError};
use crate::io::{ByteReader, LocalFileInput, TsFileInput};
use crate::record::RowRecord;
use crate::schema::MeasurementSchema;
use crate::statistics::Statistics;
use crate::tsfile::chunk::{ChunkHeader, ChunkReader};
use crate::tsfile::chunk_group::{ChunkGroupHeader, ChunkGroupReader};
use crate::tsfile::metadata::{DeviceStatistics, MetadataIndex, HEAD_SIZE, MAGIC, TRAILER_SIZE, VERSION};
use crate::tsfile::page::DecodedPage;
use crate::types::{Path, TimeRange, Timestamp, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path as FsPath;
use std::sync::Arc;
use tracing::debug;

/// One chunk group found by [`TsFileReader::chunk_groups`].
#[derive(Debug, Clone)]
pub struct ChunkGroupSummary {
    /// Offset of the group header.
    pub offset: u64,
    /// The group header.
    pub header: ChunkGroupHeader,
    /// Chunk headers in file order.
    pub chunks: Vec<ChunkHeader>,
}

/// Read-only view of a closed file. Safe to share across threads; every
/// query decodes independently.
pub struct TsFileReader {
    input: Arc<dyn TsFileInput>,
    index: MetadataIndex,
    footer_offset: u64,
}

impl TsFileReader {
    /// Opens a local file.
    pub fn open(path: impl AsRef<FsPath>) -> Result<Self> {
        Self::from_input(Arc::new(LocalFileInput::open(path)?))
    }

    /// Validates the framing and loads the footer index.
    pub fn from_input(input: Arc<dyn TsFileInput>) -> Result<Self> {
        let size = input.size()?;
        if size < (HEAD_SIZE + TRAILER_SIZE) as u64 {
            return Err(TsFileError::CorruptFooter(format!("file of {} bytes is too small", size)));
        }

        let head = input.read_vec(0, HEAD_SIZE)?;
        if head[..MAGIC.len()] != MAGIC {
            return Err(TsFileError::InvalidMagic(head[..MAGIC.len()].to_vec()));
        }
        if head[MAGIC.len()] != VERSION {
            return Err(TsFileError::UnsupportedVersion(head[MAGIC.len()]));
        }

        let trailer_offset = size - TRAILER_SIZE as u64;
        let trailer = input.read_vec(trailer_offset, TRAILER_SIZE)?;
        let mut trailer_reader = ByteReader::new(&trailer);
        let footer_offset = trailer_reader.read_u64()?;
        if trailer_reader.rest() != MAGIC {
            return Err(TsFileError::InvalidMagic(trailer_reader.rest().to_vec()));
        }
        if footer_offset < HEAD_SIZE as u64 || footer_offset > trailer_offset.saturating_sub(4) {
            return Err(TsFileError::CorruptFooter(format!(
                "footer offset {} outside data region",
                footer_offset
            )));
        }

        let footer = input.read_vec(footer_offset, (trailer_offset - footer_offset) as usize)?;
        let (body, crc_bytes) = footer.split_at(footer.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(TsFileError::ChecksumMismatch { expected, actual });
        }
        let index = MetadataIndex::read_from(&mut ByteReader::new(body)).map_err(|e| match e {
            TsFileError::CorruptFooter(_) => e,
            other => TsFileError::CorruptFooter(other.to_string()),
        })?;

        debug!(
            "Opened file: {} bytes, {} devices, footer at {}",
            size,
            index.devices().count(),
            footer_offset
        );
        Ok(Self {
            input,
            index,
            footer_offset,
        })
    }

    /// The footer index.
    pub fn metadata(&self) -> &MetadataIndex {
        &self.index
    }

    /// Device identifiers in order.
    pub fn devices(&self) -> Vec<&str> {
        self.index.devices().map(|d| d.device_id.as_str()).collect()
    }

    /// Measurements of a device that hold data.
    pub fn measurements(&self, device_id: &str) -> Option<Vec<&MeasurementSchema>> {
        let device = self.index.device(device_id)?;
        Some(device.timeseries.iter().map(|t| &t.schema).collect())
    }

    /// Whether a device is aligned.
    pub fn is_aligned(&self, device_id: &str) -> Option<bool> {
        self.index.device(device_id).map(|d| d.aligned)
    }

    /// File-level statistics of a series.
    pub fn statistics(&self, path: &Path) -> Option<&Statistics> {
        self.index.timeseries(path).map(|t| &t.statistics)
    }

    /// Time span and point count of a device.
    pub fn device_statistics(&self, device_id: &str) -> Option<DeviceStatistics> {
        self.index.device(device_id).map(|d| d.statistics)
    }

    /// Finds the chunks holding `path` by walking the device's chunk groups,
    /// skipping the pages of every other chunk. Returns chunk offsets with
    /// their headers, in file order.
    pub fn scan_chunks(&self, path: &Path) -> Result<Vec<(u64, ChunkHeader)>> {
        let Some(device) = self.index.device(&path.device) else {
            return Ok(Vec::new());
        };
        let measurements = [path.measurement.as_str()];
        let mut found = Vec::new();
        for &offset in &device.chunk_group_offsets {
            let mut group = ChunkGroupReader::open(self.input.clone(), offset)?;
            if group.header().device_id != path.device {
                return Err(TsFileError::CorruptFooter(format!(
                    "chunk group at {} belongs to {}, not {}",
                    offset,
                    group.header().device_id,
                    path.device
                )));
            }
            found.extend(group.find_chunks(&measurements)?);
        }
        Ok(found)
    }

    /// Walks the data region group by group, reading only headers.
    pub fn chunk_groups(&self) -> Result<Vec<ChunkGroupSummary>> {
        let mut groups = Vec::new();
        let mut offset = HEAD_SIZE as u64;
        while offset < self.footer_offset {
            let mut reader = ChunkGroupReader::open(self.input.clone(), offset)?;
            let mut chunks = Vec::new();
            while let Some((_, header)) = reader.next_chunk()? {
                chunks.push(header);
            }
            groups.push(ChunkGroupSummary {
                offset,
                header: reader.header().clone(),
                chunks,
            });
            offset = reader.end_offset();
        }
        if offset != self.footer_offset {
            return Err(TsFileError::CodecMismatch(format!(
                "data region ends at {}, footer starts at {}",
                offset, self.footer_offset
            )));
        }
        Ok(groups)
    }

    /// Queries every timestamp of the given paths.
    pub fn query(&self, paths: &[Path]) -> QueryDataSet {
        self.query_range(paths, TimeRange::all())
    }

    /// Queries the given paths within an inclusive time range.
    ///
    /// Rows come out in ascending timestamp order with one field per path.
    /// Paths absent from the file are always null.
    pub fn query_range(&self, paths: &[Path], range: TimeRange) -> QueryDataSet {
        let mut cursors: Vec<SeriesCursor> = Vec::new();
        // Chunk offsets per cursor; a set because aligned columns share chunks.
        let mut offsets: Vec<BTreeSet<u64>> = Vec::new();
        let mut aligned: BTreeMap<&str, usize> = BTreeMap::new();

        for (slot, path) in paths.iter().enumerate() {
            let (Some(device), Some(series)) = (self.index.device(&path.device), self.index.timeseries(path)) else {
                continue;
            };
            let cursor = if device.aligned {
                *aligned.entry(device.device_id.as_str()).or_insert_with(|| {
                    cursors.push(SeriesCursor::new());
                    offsets.push(BTreeSet::new());
                    cursors.len() - 1
                })
            } else {
                cursors.push(SeriesCursor::new());
                offsets.push(BTreeSet::new());
                cursors.len() - 1
            };
            cursors[cursor].add_slot(slot, &path.measurement);
            offsets[cursor].extend(series.chunks_in(range).map(|c| c.offset));
        }
        for (cursor, offsets) in cursors.iter_mut().zip(offsets) {
            cursor.chunk_offsets.extend(offsets);
        }

        QueryDataSet {
            input: self.input.clone(),
            range,
            width: paths.len(),
            cursors,
            heads: Vec::new(),
            done: false,
        }
    }
}

struct PageCursor {
    page: DecodedPage,
    row: usize,
    value_positions: Vec<usize>,
    /// Layout column per requested measurement.
    slot_columns: Vec<Option<usize>>,
}

impl PageCursor {
    fn next_row(&mut self) -> Option<(Timestamp, Vec<Option<Value>>)> {
        let timestamp = *self.page.timestamps.get(self.row)?;
        let mut row_values = vec![None; self.page.columns.len()];
        for (i, column) in self.page.columns.iter().enumerate() {
            if let Some(column) = column {
                row_values[i] = column.value_at(self.row, &mut self.value_positions[i]);
            }
        }
        self.row += 1;
        let values = self
            .slot_columns
            .iter()
            .map(|c| c.and_then(|i| row_values[i].clone()))
            .collect();
        Some((timestamp, values))
    }
}

/// Yields the rows of one non-aligned series, or of the requested columns
/// of one aligned device.
struct SeriesCursor {
    slots: Vec<usize>,
    measurements: Vec<String>,
    chunk_offsets: VecDeque<u64>,
    chunk: Option<ChunkReader>,
    page: Option<PageCursor>,
    done: bool,
}

impl SeriesCursor {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            measurements: Vec::new(),
            chunk_offsets: VecDeque::new(),
            chunk: None,
            page: None,
            done: false,
        }
    }

    fn add_slot(&mut self, slot: usize, measurement: &str) {
        self.slots.push(slot);
        self.measurements.push(measurement.to_string());
    }

    fn next_row(
        &mut self,
        input: &Arc<dyn TsFileInput>,
        range: TimeRange,
    ) -> Result<Option<(Timestamp, Vec<Option<Value>>)>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if let Some(page) = &mut self.page {
                if let Some((timestamp, values)) = page.next_row() {
                    if timestamp > range.end {
                        self.done = true;
                        return Ok(None);
                    }
                    if timestamp < range.start || values.iter().all(Option::is_none) {
                        continue;
                    }
                    return Ok(Some((timestamp, values)));
                }
                self.page = None;
            }
            if let Some(chunk) = &mut self.chunk {
                match chunk.next_page()? {
                    Some(page) => {
                        let header = chunk.header();
                        let slot_columns = self.measurements.iter().map(|m| header.column_index(m)).collect();
                        self.page = Some(PageCursor {
                            value_positions: vec![0; page.columns.len()],
                            page,
                            row: 0,
                            slot_columns,
                        });
                    }
                    None => self.chunk = None,
                }
                continue;
            }
            match self.chunk_offsets.pop_front() {
                Some(offset) => {
                    let names: Vec<&str> = self.measurements.iter().map(String::as_str).collect();
                    self.chunk = Some(ChunkReader::open(input.clone(), offset, &names, range)?);
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

/// Lazy, forward-only sequence of query rows.
///
/// An error is yielded once, after which the iterator ends.
pub struct QueryDataSet {
    input: Arc<dyn TsFileInput>,
    range: TimeRange,
    width: usize,
    cursors: Vec<SeriesCursor>,
    /// Pending row per cursor; `None` once the cursor is exhausted.
    heads: Vec<Option<(Timestamp, Vec<Option<Value>>)>>,
    done: bool,
}

impl QueryDataSet {
    /// Number of fields per row.
    pub fn width(&self) -> usize {
        self.width
    }

    fn advance(&mut self) -> Result<Option<RowRecord>> {
        if self.heads.is_empty() {
            for cursor in &mut self.cursors {
                self.heads.push(cursor.next_row(&self.input, self.range)?);
            }
        }

        let Some(timestamp) = self.heads.iter().flatten().map(|(ts, _)| *ts).min() else {
            return Ok(None);
        };

        let mut fields = vec![None; self.width];
        for (cursor, head) in self.cursors.iter_mut().zip(self.heads.iter_mut()) {
            if !matches!(head, Some((ts, _)) if *ts == timestamp) {
                continue;
            }
            if let Some((_, values)) = head.take() {
                for (&slot, value) in cursor.slots.iter().zip(values) {
                    fields[slot] = value;
                }
            }
            *head = cursor.next_row(&self.input, self.range)?;
        }
        Ok(Some(RowRecord::new(timestamp, fields)))
    }
}

impl Iterator for QueryDataSet {
    type Item = Result<RowRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
