use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Weak};

use stow_store::ElementKind;
use stow_types::names::{validate_name, DEFAULT_MAX_NAME_LEN};
use stow_types::Guid;
use tracing::debug;

use crate::cache::HandleCache;
use crate::collection::ChildKind;
use crate::container::element_ids;
use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::{StorageHandle, StreamHandle};
use crate::mapper::NameMapper;
use crate::object_stream::{ObjectReader, ObjectWriter};
use crate::session::Session;
use crate::traits::CachedHandle;

/// Largest content [`StorageObject::data`] and [`StorageObject::set_data`]
/// handle as one buffer.
pub const MAX_DATA_LEN: u64 = i32::MAX as u64;

fn check_len(len: u64) -> StorageResult<()> {
    if len > MAX_DATA_LEN {
        return Err(StorageError::TooLarge {
            len,
            limit: MAX_DATA_LEN,
        });
    }
    Ok(())
}

/// Objects: child streams named by the storage-safe form of their GUID.
pub struct ObjectKind;

impl ChildKind for ObjectKind {
    type Handle = StreamHandle;
    type Item = StorageObject;

    const ENTITY: EntityKind = EntityKind::Object;

    fn mapper(parent: &StorageHandle) -> &NameMapper {
        &parent.objects
    }

    fn cache(session: &Session) -> &HandleCache<StreamHandle> {
        &session.streams
    }

    fn create(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<StreamHandle>> {
        let name = id.to_storage_name();
        let stream = parent.with_storage(|s| {
            s.create_stream(&name)
                .map_err(StorageError::backend("create object", id))
        })?;
        Ok(StreamHandle::new(id, stream))
    }

    fn open(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<StreamHandle>> {
        let name = id.to_storage_name();
        let mode = parent.access_mode();
        let stream = parent.with_storage(|s| {
            s.open_stream(&name, mode)
                .map_err(StorageError::on_open("open object", EntityKind::Object, id))
        })?;
        Ok(StreamHandle::new(id, stream))
    }

    fn destroy(parent: &StorageHandle, id: Guid) -> StorageResult<()> {
        parent.with_storage(|s| {
            s.destroy_element(&id.to_storage_name())
                .map_err(StorageError::on_open("destroy object", EntityKind::Object, id))
        })
    }

    fn physical_ids(parent: &StorageHandle) -> StorageResult<Vec<Guid>> {
        element_ids(parent, ElementKind::Stream)
    }

    fn wrap(
        _session: Weak<Session>,
        parent: Arc<StorageHandle>,
        handle: Arc<StreamHandle>,
    ) -> StorageObject {
        StorageObject { parent, handle }
    }
}

/// A named binary blob.
///
/// Cloning is cheap; every clone shares the open stream. Use
/// [`StorageObject::reader`] and [`StorageObject::writer`] for cursors with
/// their own position.
#[derive(Clone)]
pub struct StorageObject {
    parent: Arc<StorageHandle>,
    handle: Arc<StreamHandle>,
}

impl StorageObject {
    /// The GUID this object is stored under.
    pub fn id(&self) -> Guid {
        self.handle.id()
    }

    pub fn is_read_only(&self) -> bool {
        self.handle.is_read_only()
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.is_read_only() {
            return Err(StorageError::ReadOnly(EntityKind::Object));
        }
        Ok(())
    }

    pub fn name(&self) -> StorageResult<String> {
        self.handle.with_stream(|_| Ok(()))?;
        self.parent
            .objects
            .map_guid_to_name(self.id())
            .map_err(|e| e.for_entity(EntityKind::Object))
    }

    pub fn set_name(&self, name: &str) -> StorageResult<()> {
        validate_name(name, DEFAULT_MAX_NAME_LEN)?;
        self.handle.with_stream(|_| Ok(()))?;
        if self.parent.is_read_only() {
            return Err(StorageError::ReadOnly(EntityKind::Object));
        }
        self.parent
            .objects
            .rename_mapping(self.id(), name)
            .map_err(|e| e.for_entity(EntityKind::Object))?;
        debug!(id = %self.id(), name, "object renamed");
        Ok(())
    }

    /// Length of the content in bytes.
    pub fn len(&self) -> StorageResult<u64> {
        let id = self.id();
        self.handle
            .with_stream(|s| s.len().map_err(StorageError::backend("read object length", id)))
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The whole content.
    ///
    /// Fails with [`StorageError::TooLarge`] rather than truncating content
    /// longer than [`MAX_DATA_LEN`].
    pub fn data(&self) -> StorageResult<Vec<u8>> {
        let id = self.id();
        self.handle.with_stream(|s| {
            let len = s.len().map_err(StorageError::backend("read object", id))?;
            check_len(len)?;
            s.seek(SeekFrom::Start(0))
                .map_err(StorageError::stream_io("read object", id))?;
            let mut data = Vec::with_capacity(len as usize);
            s.read_to_end(&mut data)
                .map_err(StorageError::stream_io("read object", id))?;
            Ok(data)
        })
    }

    /// Replace the whole content.
    pub fn set_data(&self, data: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        let len = data.len() as u64;
        check_len(len)?;
        let id = self.id();
        self.handle.with_stream(|s| {
            s.set_len(len)
                .map_err(StorageError::backend("write object", id))?;
            s.seek(SeekFrom::Start(0))
                .map_err(StorageError::stream_io("write object", id))?;
            s.write_all(data)
                .map_err(StorageError::stream_io("write object", id))?;
            s.commit().map_err(StorageError::backend("commit object", id))
        })?;
        debug!(%id, len, "object data replaced");
        Ok(())
    }

    /// A read cursor at offset zero.
    pub fn reader(&self) -> StorageResult<ObjectReader> {
        let stream = self.handle.clone_stream()?;
        Ok(ObjectReader::new(self.handle.clone(), stream))
    }

    /// A write cursor at offset zero.
    pub fn writer(&self) -> StorageResult<ObjectWriter> {
        self.ensure_writable()?;
        let stream = self.handle.clone_stream()?;
        Ok(ObjectWriter::new(self.handle.clone(), stream))
    }
}

impl fmt::Debug for StorageObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageObject")
            .field("id", &self.id())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}
