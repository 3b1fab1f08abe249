//! Shared wrappers around open primitive handles.
//!
//! One wrapper exists per open node. The session caches hold them weakly;
//! containers, objects and property sets hold them strongly.

use std::fmt;
use std::io::{self, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use stow_store::{AccessMode, PropertyStorage, Storage, Stream};
use stow_types::{fmtid, Guid};

use crate::error::{EntityKind, StorageError, StorageResult};
use crate::mapper::NameMapper;
use crate::traits::CachedHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An open storage node together with the name mappers of its children.
pub struct StorageHandle {
    id: Guid,
    mode: AccessMode,
    storage: RwLock<Option<Storage>>,
    pub(crate) containers: NameMapper,
    pub(crate) objects: NameMapper,
    pub(crate) property_sets: NameMapper,
}

impl StorageHandle {
    pub(crate) fn new(id: Guid, storage: Storage) -> Arc<Self> {
        let mode = storage.mode();
        let read_only = !mode.is_writable();
        Arc::new_cyclic(|owner: &Weak<StorageHandle>| Self {
            id,
            mode,
            storage: RwLock::new(Some(storage)),
            containers: NameMapper::new(fmtid::CONTAINER_NAME_MAPPER, owner.clone(), read_only),
            objects: NameMapper::new(fmtid::OBJECT_NAME_MAPPER, owner.clone(), read_only),
            property_sets: NameMapper::new(
                fmtid::PROPERTY_SET_NAME_MAPPER,
                owner.clone(),
                read_only,
            ),
        })
    }

    /// Run `f` against the open storage.
    pub(crate) fn with_storage<R>(
        &self,
        f: impl FnOnce(&Storage) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let guard = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(storage) => f(storage).map_err(|e| e.disposed_as(EntityKind::Container)),
            None => Err(StorageError::Disposed(EntityKind::Container)),
        }
    }

    pub(crate) fn ensure_live(&self) -> StorageResult<()> {
        self.with_storage(|_| Ok(()))
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        !self.mode.is_writable()
    }
}

impl CachedHandle for StorageHandle {
    fn id(&self) -> Guid {
        self.id
    }

    fn dispose(&self) {
        self.containers.dispose();
        self.objects.dispose();
        self.property_sets.dispose();
        let storage = self
            .storage
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(storage);
    }

    fn is_disposed(&self) -> bool {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An open stream plus the clones handed out to readers and writers.
pub struct StreamHandle {
    id: Guid,
    mode: AccessMode,
    stream: Mutex<Option<Stream>>,
    clones: Mutex<Vec<Weak<StreamClone>>>,
}

impl StreamHandle {
    pub(crate) fn new(id: Guid, stream: Stream) -> Arc<Self> {
        Arc::new(Self {
            id,
            mode: stream.mode(),
            stream: Mutex::new(Some(stream)),
            clones: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_stream<R>(
        &self,
        f: impl FnOnce(&mut Stream) -> StorageResult<R>,
    ) -> StorageResult<R> {
        match lock(&self.stream).as_mut() {
            Some(stream) => f(stream).map_err(|e| e.disposed_as(EntityKind::Object)),
            None => Err(StorageError::Disposed(EntityKind::Object)),
        }
    }

    /// Clone the stream into an independent cursor positioned at offset zero.
    ///
    /// The clone is tracked so that disposing this handle disposes it too.
    pub(crate) fn clone_stream(&self) -> StorageResult<Arc<StreamClone>> {
        let id = self.id;
        let stream = self.with_stream(|stream| {
            let mut clone = stream
                .try_clone()
                .map_err(StorageError::backend("clone stream", id))?;
            clone
                .seek(SeekFrom::Start(0))
                .map_err(StorageError::stream_io("seek", id))?;
            Ok(clone)
        })?;
        let clone = Arc::new(StreamClone {
            stream: Mutex::new(Some(stream)),
        });
        let mut clones = lock(&self.clones);
        clones.retain(|c| c.strong_count() > 0);
        clones.push(Arc::downgrade(&clone));
        Ok(clone)
    }

    pub fn is_read_only(&self) -> bool {
        !self.mode.is_writable()
    }

    #[cfg(test)]
    pub(crate) fn live_clones(&self) -> usize {
        lock(&self.clones)
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }
}

impl CachedHandle for StreamHandle {
    fn id(&self) -> Guid {
        self.id
    }

    fn dispose(&self) {
        let stream = lock(&self.stream).take();
        drop(stream);
        let clones: Vec<_> = lock(&self.clones).drain(..).collect();
        for clone in clones.iter().filter_map(Weak::upgrade) {
            clone.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        lock(&self.stream).is_none()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A cloned stream cursor owned by one reader or writer.
pub struct StreamClone {
    stream: Mutex<Option<Stream>>,
}

impl StreamClone {
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Stream) -> io::Result<R>) -> io::Result<R> {
        match lock(&self.stream).as_mut() {
            Some(stream) => f(stream),
            None => Err(io::Error::other(StorageError::Disposed(EntityKind::Object))),
        }
    }

    pub(crate) fn ensure_live(&self) -> StorageResult<()> {
        if lock(&self.stream).is_none() {
            return Err(StorageError::Disposed(EntityKind::Object));
        }
        Ok(())
    }

    fn dispose(&self) {
        let stream = lock(&self.stream).take();
        drop(stream);
    }
}

/// An open property set.
pub struct PropertySetHandle {
    id: Guid,
    mode: AccessMode,
    props: RwLock<Option<PropertyStorage>>,
}

impl PropertySetHandle {
    pub(crate) fn new(props: PropertyStorage) -> Arc<Self> {
        Arc::new(Self {
            id: props.fmtid(),
            mode: props.mode(),
            props: RwLock::new(Some(props)),
        })
    }

    pub(crate) fn with_props<R>(
        &self,
        f: impl FnOnce(&PropertyStorage) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let guard = self.props.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(props) => f(props).map_err(|e| e.disposed_as(EntityKind::PropertySet)),
            None => Err(StorageError::Disposed(EntityKind::PropertySet)),
        }
    }

    pub fn is_read_only(&self) -> bool {
        !self.mode.is_writable()
    }
}

impl CachedHandle for PropertySetHandle {
    fn id(&self) -> Guid {
        self.id
    }

    fn dispose(&self) {
        let props = self
            .props
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(props);
    }

    fn is_disposed(&self) -> bool {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for PropertySetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySetHandle")
            .field("fmtid", &self.id)
            .field("mode", &self.mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use stow_store::{create_temp_document, FormatOptions};

    #[test]
    fn disposed_storage_handle_refuses_work() {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let handle = StorageHandle::new(Guid::nil(), root);
        assert!(!handle.is_read_only());
        handle.ensure_live().unwrap();
        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());
        assert!(matches!(
            handle.ensure_live(),
            Err(StorageError::Disposed(EntityKind::Container))
        ));
    }

    #[test]
    fn clones_have_independent_cursors_and_die_with_the_handle() {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let id = Guid::new_v4();
        let stream = root.create_stream(&id.to_storage_name()).unwrap();
        let handle = StreamHandle::new(id, stream);
        handle
            .with_stream(|s| {
                s.write_all(b"abcdef").unwrap();
                Ok(())
            })
            .unwrap();

        let a = handle.clone_stream().unwrap();
        let b = handle.clone_stream().unwrap();
        assert_eq!(handle.live_clones(), 2);

        let mut buf = [0u8; 3];
        a.with(|s| s.read_exact(&mut buf)).unwrap();
        assert_eq!(&buf, b"abc");
        b.with(|s| s.read_exact(&mut buf)).unwrap();
        assert_eq!(&buf, b"abc");

        drop(b);
        assert_eq!(handle.live_clones(), 1);

        handle.dispose();
        assert!(a.with(|s| s.read(&mut buf)).is_err());
    }

    #[test]
    fn property_set_handle_takes_fmtid() {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let fmtid = Guid::new_v4();
        let handle = PropertySetHandle::new(root.create_property_set(fmtid).unwrap());
        assert_eq!(handle.id(), fmtid);
        handle.with_props(|p| Ok(p.fmtid())).unwrap();
        handle.dispose();
        assert!(handle.with_props(|_| Ok(())).is_err());
    }
}
