use std::fmt;
use std::sync::{Arc, Weak};

use stow_store::{PropSpec, PropertyStat, PropertyStorage};
use stow_types::fmtid::{is_reserved, PROPERTY_SET_BASE_ID};
use stow_types::names::{validate_name, DEFAULT_MAX_NAME_LEN};
use stow_types::{Guid, PropertyValue};
use tracing::debug;

use crate::cache::HandleCache;
use crate::collection::ChildKind;
use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::{PropertySetHandle, StorageHandle};
use crate::mapper::NameMapper;
use crate::session::Session;
use crate::traits::CachedHandle;

/// Property sets: stored directly under their GUID as format id.
pub struct PropertySetKind;

impl ChildKind for PropertySetKind {
    type Handle = PropertySetHandle;
    type Item = PropertySet;

    const ENTITY: EntityKind = EntityKind::PropertySet;

    fn mapper(parent: &StorageHandle) -> &NameMapper {
        &parent.property_sets
    }

    fn cache(session: &Session) -> &HandleCache<PropertySetHandle> {
        &session.property_sets
    }

    fn create(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<PropertySetHandle>> {
        let props = parent.with_storage(|s| {
            s.create_property_set(id)
                .map_err(StorageError::backend("create property set", id))
        })?;
        Ok(PropertySetHandle::new(props))
    }

    fn open(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<PropertySetHandle>> {
        let mode = parent.access_mode();
        let props = parent.with_storage(|s| {
            s.open_property_set(id, mode).map_err(StorageError::on_open(
                "open property set",
                EntityKind::PropertySet,
                id,
            ))
        })?;
        Ok(PropertySetHandle::new(props))
    }

    fn destroy(parent: &StorageHandle, id: Guid) -> StorageResult<()> {
        parent.with_storage(|s| {
            s.delete_property_set(id).map_err(StorageError::on_open(
                "delete property set",
                EntityKind::PropertySet,
                id,
            ))
        })
    }

    fn physical_ids(parent: &StorageHandle) -> StorageResult<Vec<Guid>> {
        let ids = parent.with_storage(|s| {
            s.enum_property_sets()
                .map_err(StorageError::backend("enumerate property sets", parent.id()))
        })?;
        Ok(ids.into_iter().filter(|id| !is_reserved(id)).collect())
    }

    fn wrap(
        _session: Weak<Session>,
        parent: Arc<StorageHandle>,
        handle: Arc<PropertySetHandle>,
    ) -> PropertySet {
        PropertySet { parent, handle }
    }
}

/// A named bag of typed scalar properties.
///
/// Property names compare case-insensitively. Only the user value kinds are
/// accepted (see [`stow_types::ValueKind::is_user_kind`]); every write
/// commits immediately. Positional access follows enumeration order, which
/// is the order properties were first written.
#[derive(Clone)]
pub struct PropertySet {
    parent: Arc<StorageHandle>,
    handle: Arc<PropertySetHandle>,
}

impl PropertySet {
    /// The GUID this set is stored under, also its format id.
    pub fn id(&self) -> Guid {
        self.handle.id()
    }

    pub fn is_read_only(&self) -> bool {
        self.handle.is_read_only()
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.is_read_only() {
            return Err(StorageError::ReadOnly(EntityKind::PropertySet));
        }
        Ok(())
    }

    fn named(&self, props: &PropertyStorage) -> StorageResult<Vec<(u32, String)>> {
        let stats = props
            .enumerate()
            .map_err(StorageError::backend("enumerate properties", self.id()))?;
        Ok(stats
            .into_iter()
            .filter_map(|PropertyStat { id, name, .. }| name.map(|n| (id, n)))
            .collect())
    }

    fn commit(&self, props: &PropertyStorage) -> StorageResult<()> {
        props
            .commit()
            .map_err(StorageError::backend("commit property set", self.id()))
    }

    pub fn name(&self) -> StorageResult<String> {
        self.handle.with_props(|_| Ok(()))?;
        self.parent
            .property_sets
            .map_guid_to_name(self.id())
            .map_err(|e| e.for_entity(EntityKind::PropertySet))
    }

    pub fn set_name(&self, name: &str) -> StorageResult<()> {
        validate_name(name, DEFAULT_MAX_NAME_LEN)?;
        self.handle.with_props(|_| Ok(()))?;
        if self.parent.is_read_only() {
            return Err(StorageError::ReadOnly(EntityKind::PropertySet));
        }
        self.parent
            .property_sets
            .rename_mapping(self.id(), name)
            .map_err(|e| e.for_entity(EntityKind::PropertySet))?;
        debug!(id = %self.id(), name, "property set renamed");
        Ok(())
    }

    /// The value of property `name`.
    pub fn get(&self, name: &str) -> StorageResult<PropertyValue> {
        self.handle.with_props(|props| {
            props
                .read(PropSpec::Name(name))
                .map_err(StorageError::backend("read property", name))?
                .ok_or_else(|| StorageError::not_found(EntityKind::Property, name))
        })
    }

    /// Write property `name`, replacing any existing value.
    pub fn set(&self, name: &str, value: impl Into<PropertyValue>) -> StorageResult<()> {
        let value = value.into();
        validate_name(name, DEFAULT_MAX_NAME_LEN)?;
        self.handle.with_props(|props| {
            self.ensure_writable()?;
            let kind = value.kind();
            if !kind.is_user_kind() {
                return Err(StorageError::InvalidDataType {
                    name: name.to_string(),
                    kind: kind.to_string(),
                });
            }
            props
                .write(name, value, PROPERTY_SET_BASE_ID)
                .map_err(StorageError::backend("write property", name))?;
            self.commit(props)
        })
    }

    /// Write property `name`, failing if it already exists.
    pub fn add(&self, name: &str, value: impl Into<PropertyValue>) -> StorageResult<()> {
        if self.contains(name)? {
            return Err(StorageError::already_exists(EntityKind::Property, name));
        }
        self.set(name, value)
    }

    /// Write property `name` from loosely typed JSON.
    ///
    /// JSON that maps to no property kind fails with invalid-data-type.
    pub fn set_json(&self, name: &str, value: serde_json::Value) -> StorageResult<()> {
        let value = PropertyValue::try_from(value).map_err(|e| StorageError::InvalidDataType {
            name: name.to_string(),
            kind: e.to_string(),
        })?;
        self.set(name, value)
    }

    /// Delete property `name`. Returns `false` if it did not exist.
    pub fn remove(&self, name: &str) -> StorageResult<bool> {
        self.handle.with_props(|props| {
            self.ensure_writable()?;
            let removed = props
                .delete(PropSpec::Name(name))
                .map_err(StorageError::backend("delete property", name))?;
            if removed {
                self.commit(props)?;
            }
            Ok(removed)
        })
    }

    /// Delete every property.
    pub fn clear(&self) -> StorageResult<()> {
        self.handle.with_props(|props| {
            self.ensure_writable()?;
            for (id, name) in self.named(props)? {
                props
                    .delete(PropSpec::Id(id))
                    .map_err(StorageError::backend("delete property", &name))?;
            }
            self.commit(props)
        })
    }

    pub fn contains(&self, name: &str) -> StorageResult<bool> {
        self.handle.with_props(|props| {
            props
                .contains(name)
                .map_err(StorageError::backend("read property", name))
        })
    }

    pub fn count(&self) -> StorageResult<usize> {
        self.handle.with_props(|props| Ok(self.named(props)?.len()))
    }

    fn entry_at(&self, props: &PropertyStorage, index: usize) -> StorageResult<(u32, String)> {
        let mut named = self.named(props)?;
        let count = named.len();
        if index >= count {
            return Err(StorageError::IndexOutOfRange { index, count });
        }
        Ok(named.swap_remove(index))
    }

    /// Name of the property at `index` in enumeration order.
    pub fn name_at(&self, index: usize) -> StorageResult<String> {
        self.handle
            .with_props(|props| Ok(self.entry_at(props, index)?.1))
    }

    /// Value of the property at `index` in enumeration order.
    pub fn get_at(&self, index: usize) -> StorageResult<PropertyValue> {
        self.handle.with_props(|props| {
            let (id, name) = self.entry_at(props, index)?;
            props
                .read(PropSpec::Id(id))
                .map_err(StorageError::backend("read property", &name))?
                .ok_or_else(|| StorageError::not_found(EntityKind::Property, name))
        })
    }

    /// Overwrite the property at `index` in enumeration order.
    pub fn set_at(&self, index: usize, value: impl Into<PropertyValue>) -> StorageResult<()> {
        let name = self.name_at(index)?;
        self.set(&name, value)
    }

    /// Snapshot of every `(name, value)` pair in enumeration order.
    pub fn iter(&self) -> StorageResult<Vec<(String, PropertyValue)>> {
        self.handle.with_props(|props| {
            let mut entries = Vec::new();
            for (id, name) in self.named(props)? {
                let value = props
                    .read(PropSpec::Id(id))
                    .map_err(StorageError::backend("read property", &name))?;
                if let Some(value) = value {
                    entries.push((name, value));
                }
            }
            Ok(entries)
        })
    }
}

impl fmt::Debug for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySet")
            .field("id", &self.id())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}
