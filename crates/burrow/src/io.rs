//! Storage boundary and little-endian byte helpers.
//!
//! The writer appends to a [`TsFileOutput`]; the reader issues positional reads
//! against a [`TsFileInput`]. Local-file and in-memory implementations are
//! provided. [`ByteReader`] is the bounds-checked cursor every on-disk structure
//! is parsed with.

use crate::error::{Result, TsFileError};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Append-only byte sink the writer serializes into.
pub trait TsFileOutput: Send {
    /// Appends the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Pushes buffered bytes to the underlying store.
    fn flush(&mut self) -> Result<()>;

    /// Flushes and makes the written bytes durable.
    fn sync(&mut self) -> Result<()>;
}

/// Random-access byte source the reader decodes from.
///
/// Implementations must tolerate concurrent `read_at` calls.
pub trait TsFileInput: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> Result<u64>;

    /// Fills `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Reads `len` bytes at `offset`, failing without allocating if the range
    /// runs past the end.
    fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let size = self.size()?;
        let remaining = size.saturating_sub(offset) as usize;
        if offset > size || len > remaining {
            return Err(TsFileError::Truncated {
                needed: len,
                remaining,
            });
        }
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Buffered local file output.
pub struct LocalFileOutput {
    writer: BufWriter<File>,
    position: u64,
}

impl LocalFileOutput {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            position: 0,
        })
    }
}

impl TsFileOutput for LocalFileOutput {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Local file input.
pub struct LocalFileInput {
    file: Mutex<File>,
    size: u64,
}

impl LocalFileInput {
    /// Opens the file at `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl TsFileInput for LocalFileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file handle lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

/// Growable in-memory output.
#[derive(Debug, Default, Clone)]
pub struct MemoryOutput {
    buf: Vec<u8>,
}

impl MemoryOutput {
    /// Creates an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the output, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl TsFileOutput for MemoryOutput {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Immutable in-memory input, cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryInput {
    data: Arc<[u8]>,
}

impl MemoryInput {
    /// Wraps the given bytes.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl From<Vec<u8>> for MemoryInput {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl TsFileInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(buf.len());
        let src = self.data.get(start..end).ok_or(TsFileError::Truncated {
            needed: buf.len(),
            remaining: self.data.len().saturating_sub(start),
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Writes a `u16`-length-prefixed UTF-8 string.
pub(crate) fn write_str<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| TsFileError::ValueTooLong {
        len: bytes.len(),
        max: u16::MAX as usize,
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Appends an unsigned LEB128 varint.
pub(crate) fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Appends a zigzag-mapped signed varint.
pub(crate) fn put_varint(out: &mut Vec<u8>, value: i64) {
    put_uvarint(out, ((value << 1) ^ (value >> 63)) as u64);
}

/// Bounds-checked little-endian cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($name:ident, $t:ty) => {
        #[doc = concat!("Reads a little-endian `", stringify!($t), "`.")]
        pub fn $name(&mut self) -> Result<$t> {
            let bytes = self.read_array::<{ std::mem::size_of::<$t>() }>()?;
            Ok(<$t>::from_le_bytes(bytes))
        }
    };
}

impl<'a> ByteReader<'a> {
    /// Starts reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true if every byte was consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrows the unread tail.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Consumes the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(TsFileError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consumes the next `N` bytes as an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    read_le!(read_u16, u16);
    read_le!(read_u32, u32);
    read_le!(read_u64, u64);
    read_le!(read_i32, i32);
    read_le!(read_i64, i64);
    read_le!(read_f32, f32);
    read_le!(read_f64, f64);

    /// Reads a `u16`-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        self.read_utf8(len)
    }

    /// Reads `len` bytes as UTF-8.
    pub fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TsFileError::CodecMismatch(format!("invalid UTF-8: {}", e)))
    }

    /// Reads an unsigned LEB128 varint.
    pub fn read_uvarint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(TsFileError::CodecMismatch("varint overflows u64".into()));
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(TsFileError::CodecMismatch("varint overflows u64".into()));
            }
        }
    }

    /// Reads a zigzag-mapped signed varint.
    pub fn read_varint(&mut self) -> Result<i64> {
        let raw = self.read_uvarint()?;
        Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
    }

    /// Reads a varint used as a length or index.
    pub fn read_len(&mut self) -> Result<usize> {
        let raw = self.read_uvarint()?;
        usize::try_from(raw)
            .map_err(|_| TsFileError::CodecMismatch(format!("length {} out of range", raw)))
    }
}
