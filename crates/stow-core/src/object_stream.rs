//! Directional cursors over an object's content.
//!
//! Each reader or writer owns a clone of the object's stream, so cursors
//! never share a seek position. Both start at offset zero.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::handle::{StreamClone, StreamHandle};
use crate::traits::CachedHandle;

/// Read-only cursor over an object.
pub struct ObjectReader {
    owner: Arc<StreamHandle>,
    stream: Arc<StreamClone>,
}

impl ObjectReader {
    pub(crate) fn new(owner: Arc<StreamHandle>, stream: Arc<StreamClone>) -> Self {
        Self { owner, stream }
    }

    /// Current length of the object in bytes.
    pub fn len(&self) -> StorageResult<u64> {
        stream_len(&self.owner, &self.stream)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.with(|s| s.read(buf))
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.with(|s| s.seek(pos))
    }
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("object", &self.owner.id())
            .finish()
    }
}

/// Write-only cursor over an object. `flush` commits the stream.
pub struct ObjectWriter {
    owner: Arc<StreamHandle>,
    stream: Arc<StreamClone>,
}

impl ObjectWriter {
    pub(crate) fn new(owner: Arc<StreamHandle>, stream: Arc<StreamClone>) -> Self {
        Self { owner, stream }
    }

    pub fn len(&self) -> StorageResult<u64> {
        stream_len(&self.owner, &self.stream)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or zero-extend the object. The cursor does not move.
    pub fn set_len(&mut self, len: u64) -> StorageResult<()> {
        self.stream.ensure_live()?;
        self.stream
            .with(|s| s.set_len(len).map_err(io::Error::from))
            .map_err(StorageError::stream_io("set object length", self.owner.id()))
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.with(|s| s.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.with(|s| s.flush())
    }
}

impl Seek for ObjectWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.with(|s| s.seek(pos))
    }
}

impl fmt::Debug for ObjectWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWriter")
            .field("object", &self.owner.id())
            .finish()
    }
}

fn stream_len(owner: &StreamHandle, stream: &StreamClone) -> StorageResult<u64> {
    stream.ensure_live()?;
    stream
        .with(|s| s.len().map_err(io::Error::from))
        .map_err(StorageError::stream_io("read object length", owner.id()))
}
