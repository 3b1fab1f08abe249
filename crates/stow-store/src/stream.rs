use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::document::DocumentShared;
use crate::error::{StoreError, StoreResult};
use crate::mode::{flags, AccessMode};
use crate::node::{RegionLock, StreamNode};
use crate::storage::{ElementKind, StatInfo};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Largest length a stream may reach.
pub const MAX_STREAM_LEN: u64 = u32::MAX as u64;

fn check_stream_len(len: u64) -> StoreResult<usize> {
    if len > MAX_STREAM_LEN {
        return Err(StoreError::TooLarge {
            len,
            limit: MAX_STREAM_LEN,
        });
    }
    usize::try_from(len).map_err(|_| StoreError::TooLarge {
        len,
        limit: MAX_STREAM_LEN,
    })
}

/// Holds a stream node open; shared by a handle and all of its clones.
struct Lease {
    node: Arc<StreamNode>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.node.release();
    }
}

/// An open stream.
///
/// Each handle has its own seek position. [`Stream::try_clone`] produces a
/// further handle on the same node without reopening it; the node stays
/// open until the original and every clone are dropped.
pub struct Stream {
    lease: Arc<Lease>,
    name: String,
    mode: AccessMode,
    doc: Arc<DocumentShared>,
    position: u64,
    handle_id: u64,
}

impl Stream {
    pub(crate) fn open(
        node: Arc<StreamNode>,
        name: &str,
        mode: AccessMode,
        doc: Arc<DocumentShared>,
    ) -> StoreResult<Self> {
        node.try_open(name)?;
        Ok(Self {
            lease: Arc::new(Lease { node }),
            name: name.to_string(),
            mode,
            doc,
            position: 0,
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn node(&self) -> &StreamNode {
        &self.lease.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.doc.ensure_open()?;
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    /// A new handle on the same stream, starting at this handle's position.
    pub fn try_clone(&self) -> StoreResult<Stream> {
        self.doc.ensure_open()?;
        self.node().read().ensure_live()?;
        Ok(Self {
            lease: self.lease.clone(),
            name: self.name.clone(),
            mode: self.mode,
            doc: self.doc.clone(),
            position: self.position,
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Current length in bytes.
    pub fn len(&self) -> StoreResult<u64> {
        self.doc.ensure_open()?;
        let state = self.node().read();
        state.ensure_live()?;
        Ok(state.data.len() as u64)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or zero-extend the stream. The position is unchanged.
    pub fn set_len(&mut self, len: u64) -> StoreResult<()> {
        self.check_writable()?;
        let len = check_stream_len(len)?;
        let mut state = self.node().write();
        state.ensure_live()?;
        state.data.resize(len, 0);
        self.doc.mark_dirty();
        Ok(())
    }

    /// Lock a byte range against other handles.
    pub fn lock_region(&self, offset: u64, len: u64) -> StoreResult<()> {
        self.doc.ensure_open()?;
        let mut state = self.node().write();
        state.ensure_live()?;
        if state.locks.iter().any(|l| l.overlaps(offset, len)) {
            return Err(StoreError::LockViolation { offset, len });
        }
        state.locks.push(RegionLock {
            owner: self.handle_id,
            offset,
            len,
        });
        Ok(())
    }

    /// Release a range previously locked through this handle.
    pub fn unlock_region(&self, offset: u64, len: u64) -> StoreResult<()> {
        let mut state = self.node().write();
        let wanted = RegionLock {
            owner: self.handle_id,
            offset,
            len,
        };
        match state.locks.iter().position(|l| *l == wanted) {
            Some(index) => {
                state.locks.swap_remove(index);
                Ok(())
            }
            None => Err(StoreError::LockViolation { offset, len }),
        }
    }

    /// Commit pending writes. Streams run in direct mode, so this only
    /// checks that the handle is still valid.
    pub fn commit(&self) -> StoreResult<()> {
        self.doc.ensure_open()?;
        self.node().read().ensure_live()
    }

    pub fn stat(&self) -> StoreResult<StatInfo> {
        Ok(StatInfo {
            name: self.name.clone(),
            kind: ElementKind::Stream,
            size: self.len()?,
            mode_flags: self.mode.flags() | flags::SHARE_EXCLUSIVE,
        })
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.doc.ensure_open()?;
        let state = self.node().read();
        state.ensure_live()?;
        let len = state.data.len() as u64;
        if self.position >= len {
            return Ok(0);
        }
        let start = self.position as usize;
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        drop(state);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable()?;
        let end = self
            .position
            .checked_add(buf.len() as u64)
            .ok_or(StoreError::TooLarge {
                len: u64::MAX,
                limit: MAX_STREAM_LEN,
            })
            .and_then(check_stream_len)?;
        let start = end - buf.len();
        let mut state = self.node().write();
        state.ensure_live()?;
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(buf);
        drop(state);
        self.doc.mark_dirty();
        self.position = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit().map_err(io::Error::from)
    }
}

impl Seek for Stream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, offset) = match pos {
            SeekFrom::Start(n) => {
                self.position = n;
                return Ok(n);
            }
            SeekFrom::End(n) => (self.len()?, n),
            SeekFrom::Current(n) => (self.position, n),
        };
        match base.checked_add_signed(offset) {
            Some(n) => {
                self.position = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let mut state = self.node().write();
        state.locks.retain(|l| l.owner != self.handle_id);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::create_temp_document;
    use crate::mode::FormatOptions;
    use crate::storage::Storage;

    fn temp_root() -> Storage {
        create_temp_document(FormatOptions::default()).unwrap()
    }

    #[test]
    fn write_seek_read() {
        let root = temp_root();
        let mut s = root.create_stream("s").unwrap();
        s.write_all(b"hello world").unwrap();
        assert_eq!(s.len().unwrap(), 11);

        s.seek(SeekFrom::Start(6)).unwrap();
        let mut out = String::new();
        s.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");

        s.seek(SeekFrom::End(-5)).unwrap();
        assert_eq!(s.position(), 6);
        assert!(s.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn clones_have_independent_positions() {
        let root = temp_root();
        let mut s = root.create_stream("s").unwrap();
        s.write_all(b"abcdef").unwrap();
        s.seek(SeekFrom::Start(2)).unwrap();

        let mut c = s.try_clone().unwrap();
        assert_eq!(c.position(), 2);
        c.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 3];
        c.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(s.position(), 2);
    }

    #[test]
    fn node_stays_open_while_a_clone_lives() {
        let root = temp_root();
        let s = root.create_stream("s").unwrap();
        let c = s.try_clone().unwrap();
        drop(s);
        assert!(matches!(
            root.open_stream("s", AccessMode::ReadWrite),
            Err(StoreError::AccessDenied(_))
        ));
        drop(c);
        root.open_stream("s", AccessMode::ReadWrite).unwrap();
    }

    #[test]
    fn set_len_truncates_and_extends() {
        let root = temp_root();
        let mut s = root.create_stream("s").unwrap();
        s.write_all(b"0123456789").unwrap();
        s.set_len(4).unwrap();
        assert_eq!(s.len().unwrap(), 4);
        s.set_len(6).unwrap();
        s.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        s.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123\0\0");
    }

    #[test]
    fn write_past_end_zero_fills() {
        let root = temp_root();
        let mut s = root.create_stream("s").unwrap();
        s.seek(SeekFrom::Start(3)).unwrap();
        s.write_all(b"x").unwrap();
        assert_eq!(s.len().unwrap(), 4);
    }

    #[test]
    fn writes_beyond_the_length_limit_fail() {
        let root = temp_root();
        let mut s = root.create_stream("s").unwrap();
        s.seek(SeekFrom::Start(u64::MAX)).unwrap();
        let err = s.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        s.seek(SeekFrom::Start(1 << 40)).unwrap();
        assert!(s.write(b"x").is_err());
        assert!(matches!(
            s.set_len(MAX_STREAM_LEN + 1),
            Err(StoreError::TooLarge { .. })
        ));
        assert_eq!(s.len().unwrap(), 0);
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let root = temp_root();
        drop(root.create_stream("s").unwrap());
        let mut s = root.open_stream("s", AccessMode::Read).unwrap();
        let err = s.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(matches!(s.set_len(1), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn region_locks_conflict_across_handles() {
        let root = temp_root();
        let s = root.create_stream("s").unwrap();
        let c = s.try_clone().unwrap();
        s.lock_region(0, 10).unwrap();
        assert!(matches!(
            c.lock_region(5, 10),
            Err(StoreError::LockViolation { .. })
        ));
        assert!(c.unlock_region(0, 10).is_err());
        s.unlock_region(0, 10).unwrap();
        c.lock_region(5, 10).unwrap();
        drop(c);
        s.lock_region(5, 10).unwrap();
    }

    #[test]
    fn destroyed_stream_reverts() {
        let root = temp_root();
        let mut s = root.create_stream("s").unwrap();
        root.destroy_element("s").unwrap();
        assert!(matches!(s.len(), Err(StoreError::Reverted)));
        assert!(s.write(b"x").is_err());
    }
}
