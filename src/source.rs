//! Seekable byte sources and sinks.
//!
//! The codec never assumes a whole file is in memory. Everything goes through
//! [`ByteSource::read_at`] and [`ByteSink::write_at`]; sources that happen to be
//! memory resident (slices, vectors, memory maps) additionally expose their
//! bytes so large tables such as the string table can be borrowed instead of
//! copied.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};

// =============================================================================
// Byte Source
// =============================================================================

/// A random-access, read-only byte source.
pub trait ByteSource {
    /// Total size of the source in bytes.
    fn len(&self) -> u64;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// A read that would run past the end of the source fails with
    /// [`Error::Truncated`] rather than returning a short buffer.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Returns the whole source as a slice if it is memory resident.
    fn as_bytes(&self) -> Option<&[u8]> {
        None
    }

    /// Returns true if the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `len` bytes at `offset` into a new buffer.
    fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads a fixed-size array at `offset`.
    fn read_array<const N: usize>(&self, offset: u64) -> Result<[u8; N]>
    where
        Self: Sized,
    {
        let mut buf = [0u8; N];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Checks that `[offset, offset + len)` lies within a source of `total` bytes.
#[inline]
pub(crate) fn check_range(what: &'static str, offset: u64, len: u64, total: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= total => Ok(()),
        _ => Err(Error::truncated(what, offset, len)),
    }
}

fn read_from_slice(data: &[u8], offset: u64, buf: &mut [u8]) -> Result<()> {
    check_range("read", offset, buf.len() as u64, data.len() as u64)?;
    let start = offset as usize;
    buf.copy_from_slice(&data[start..start + buf.len()]);
    Ok(())
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self, offset, buf)
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self, offset, buf)
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl ByteSource for Mmap {
    fn len(&self) -> u64 {
        (**self).len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self, offset, buf)
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        (**self).as_bytes()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        (**self).as_bytes()
    }
}

// =============================================================================
// File Source
// =============================================================================

/// A file read with explicit seek-then-read calls, never memory mapped.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
    path: PathBuf,
}

impl FileSource {
    /// Opens a file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;
        let len = file.metadata()?.len();
        Ok(Self { file, len, path })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range("read", offset, buf.len() as u64, self.len)?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::truncated("read", offset, buf.len() as u64),
            _ => Error::Io(e),
        })
    }
}

/// Memory maps a file for reading.
pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Mmap> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    // SAFETY: the map is read-only; the file is not expected to be modified
    // while a session holds it.
    unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
        path: path.to_path_buf(),
        source: e,
    })
}

// =============================================================================
// Region
// =============================================================================

/// A window `[offset, offset + len)` onto another source.
///
/// Fat archive members are decoded through a region so that every offset
/// inside the embedded file is relative to the member's own start.
#[derive(Debug, Clone)]
pub struct Region<S> {
    inner: S,
    offset: u64,
    len: u64,
}

impl<S: ByteSource> Region<S> {
    /// Creates a region, failing if it does not fit inside `inner`.
    pub fn new(inner: S, offset: u64, len: u64) -> Result<Self> {
        check_range("region", offset, len, inner.len())?;
        Ok(Self { inner, offset, len })
    }

    /// Offset of the region within the underlying source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The underlying source.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ByteSource> ByteSource for Region<S> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range("read", offset, buf.len() as u64, self.len)?;
        self.inner.read_at(self.offset + offset, buf)
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        let bytes = self.inner.as_bytes()?;
        let start = self.offset as usize;
        bytes.get(start..start + self.len as usize)
    }
}

// =============================================================================
// Byte Sink
// =============================================================================

/// A random-access byte sink used by the encoder.
pub trait ByteSink {
    /// Writes `data` at `offset`, extending the sink if needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
}

impl ByteSink for Vec<u8> {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::truncated("write", offset, data.len() as u64))?;
        let end = start + data.len();
        if end > self.len() {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(data);
        Ok(())
    }
}

impl ByteSink for File {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)?;
        Ok(())
    }
}

impl<W: ByteSink + ?Sized> ByteSink for &mut W {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write_at(offset, data)
    }
}
