//! Data sources - byte channels carrying codec settings

use std::fs::{File, OpenOptions};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default ceiling on encoded string length
pub const DEFAULT_MAX_STRING: usize = 0xfffe;

/// Target byte order of encoded scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    /// Byte order of the host
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Per-source encoding settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub byte_order: ByteOrder,
    /// Interleave a type tag byte before each value
    pub debug_tags: bool,
    /// Strings longer than this are rejected before allocation
    pub max_string_len: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            debug_tags: false,
            max_string_len: DEFAULT_MAX_STRING,
        }
    }
}

/// Byte-oriented read/write channel used for binary persistence
pub trait DataSource {
    fn codec(&self) -> &CodecConfig;

    /// Fill `buf` completely or fail with a truncation error
    fn read_bytes(&mut self, buf: &mut [u8]) -> CoreResult<()>;

    fn write_bytes(&mut self, buf: &[u8]) -> CoreResult<()>;

    /// Discard `len` bytes of input
    fn skip(&mut self, len: usize) -> CoreResult<()> {
        let mut scratch = [0u8; 256];
        let mut left = len;
        while left > 0 {
            let n = left.min(scratch.len());
            self.read_bytes(&mut scratch[..n])?;
            left -= n;
        }
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

/// Data source over any std stream
#[derive(Debug)]
pub struct IoSource<T> {
    inner: T,
    codec: CodecConfig,
}

/// In-memory data source
pub type MemSource = IoSource<Cursor<Vec<u8>>>;

/// File-backed data source
pub type FileSource = IoSource<File>;

impl<T> IoSource<T> {
    pub fn new(inner: T, codec: CodecConfig) -> Self {
        Self { inner, codec }
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.codec.byte_order = order;
        self
    }

    pub fn with_debug_tags(mut self, on: bool) -> Self {
        self.codec.debug_tags = on;
        self
    }

    pub fn with_max_string_len(mut self, max: usize) -> Self {
        self.codec.max_string_len = max;
        self
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl MemSource {
    /// Empty in-memory buffer
    pub fn memory(codec: CodecConfig) -> Self {
        Self::new(Cursor::new(Vec::new()), codec)
    }

    /// Read from an existing byte buffer
    pub fn from_bytes(bytes: Vec<u8>, codec: CodecConfig) -> Self {
        Self::new(Cursor::new(bytes), codec)
    }

    /// Seek back to the start, e.g. to read what was just written
    pub fn rewind(&mut self) {
        self.inner.set_position(0);
    }

    pub fn bytes(&self) -> &[u8] {
        self.inner.get_ref()
    }
}

impl FileSource {
    pub fn open(path: &Path, codec: CodecConfig) -> CoreResult<Self> {
        Ok(Self::new(File::open(path)?, codec))
    }

    /// Create or truncate `path` for writing
    pub fn create(path: &Path, codec: CodecConfig) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file, codec))
    }
}

impl<T: Read + Write + Seek> DataSource for IoSource<T> {
    fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => CoreError::Truncated(buf.len()),
            _ => CoreError::Io(e),
        })
    }

    fn write_bytes(&mut self, buf: &[u8]) -> CoreResult<()> {
        self.inner.write_all(buf)?;
        Ok(())
    }

    fn skip(&mut self, len: usize) -> CoreResult<()> {
        let pos = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        if end < pos + len as u64 {
            self.inner.seek(SeekFrom::Start(end))?;
            return Err(CoreError::Truncated(len));
        }
        self.inner.seek(SeekFrom::Start(pos + len as u64))?;
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}
