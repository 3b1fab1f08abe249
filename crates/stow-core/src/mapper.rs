use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use stow_store::{PropSpec, PropertyStorage, StoreError};
use stow_types::fmtid::NAME_MAPPER_BASE_ID;
use stow_types::names::{eq_ignore_case, validate_name, DEFAULT_MAX_NAME_LEN};
use stow_types::{Guid, PropertyValue};
use tracing::debug;

use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::StorageHandle;

struct MapperState {
    props: Option<PropertyStorage>,
    disposed: bool,
}

/// One persisted `name -> guid` entry.
struct Entry {
    prop_id: u32,
    name: String,
    guid: Guid,
}

/// Translates human names to the GUIDs children are stored under.
///
/// Entries live in a hidden property set on the owning node, one class-id
/// property per child. The set is opened on first use and only created by
/// the first write; a node without it behaves as an empty mapping. Names
/// compare case-insensitively; GUIDs compare byte for byte. Every mutation
/// commits immediately.
pub struct NameMapper {
    fmtid: Guid,
    owner: Weak<StorageHandle>,
    read_only: bool,
    state: Mutex<MapperState>,
}

impl NameMapper {
    pub(crate) fn new(fmtid: Guid, owner: Weak<StorageHandle>, read_only: bool) -> Self {
        Self {
            fmtid,
            owner,
            read_only,
            state: Mutex::new(MapperState {
                props: None,
                disposed: false,
            }),
        }
    }

    pub fn fmtid(&self) -> Guid {
        self.fmtid
    }

    fn lock(&self) -> MutexGuard<'_, MapperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The backing property set, opening it if needed.
    ///
    /// With `create`, a missing set is created; otherwise `None` is returned.
    fn props<'a>(
        &self,
        state: &'a mut MapperState,
        create: bool,
    ) -> StorageResult<Option<&'a PropertyStorage>> {
        if state.disposed {
            return Err(StorageError::Disposed(EntityKind::Container));
        }
        if state.props.is_none() {
            let owner = self
                .owner
                .upgrade()
                .ok_or(StorageError::Disposed(EntityKind::Container))?;
            let fmtid = self.fmtid;
            let mode = owner.access_mode();
            let create = create && !self.read_only;
            state.props = owner.with_storage(|storage| {
                match storage.open_property_set(fmtid, mode) {
                    Ok(props) => Ok(Some(props)),
                    Err(StoreError::NotFound(_)) if create => {
                        debug!(%fmtid, "creating name map");
                        storage
                            .create_property_set(fmtid)
                            .map(Some)
                            .map_err(StorageError::backend("create name map", fmtid))
                    }
                    Err(StoreError::NotFound(_)) => Ok(None),
                    Err(e) => Err(StorageError::backend("open name map", fmtid)(e)),
                }
            })?;
        }
        Ok(state.props.as_ref())
    }

    fn writable_props<'a>(&self, state: &'a mut MapperState) -> StorageResult<&'a PropertyStorage> {
        if self.read_only {
            return Err(StorageError::ReadOnly(EntityKind::Mapping));
        }
        self.props(state, true)?
            .ok_or(StorageError::ReadOnly(EntityKind::Mapping))
    }

    fn entries(&self, props: &PropertyStorage) -> StorageResult<Vec<Entry>> {
        let stats = props
            .enumerate()
            .map_err(StorageError::backend("enumerate name map", self.fmtid))?;
        let mut entries = Vec::with_capacity(stats.len());
        for stat in stats {
            let Some(name) = stat.name else { continue };
            let value = props
                .read(PropSpec::Id(stat.id))
                .map_err(StorageError::backend("read name map", &name))?;
            if let Some(guid) = value.as_ref().and_then(PropertyValue::as_guid) {
                entries.push(Entry {
                    prop_id: stat.id,
                    name,
                    guid,
                });
            }
        }
        Ok(entries)
    }

    fn commit(&self, props: &PropertyStorage) -> StorageResult<()> {
        props
            .commit()
            .map_err(StorageError::backend("commit name map", self.fmtid))
    }

    /// Register `name -> guid`. Fails if the name is already mapped.
    pub fn add_mapping(&self, name: &str, guid: Guid) -> StorageResult<()> {
        validate_name(name, DEFAULT_MAX_NAME_LEN)?;
        let mut state = self.lock();
        let props = self.writable_props(&mut state)?;
        let exists = props
            .contains(name)
            .map_err(StorageError::backend("read name map", name))?;
        if exists {
            return Err(StorageError::already_exists(EntityKind::Mapping, name));
        }
        props
            .write(name, PropertyValue::ClassId(guid), NAME_MAPPER_BASE_ID)
            .map_err(StorageError::backend("write name map", name))?;
        self.commit(props)?;
        debug!(fmtid = %self.fmtid, name, %guid, "mapping added");
        Ok(())
    }

    pub fn try_map_name_to_guid(&self, name: &str) -> StorageResult<Option<Guid>> {
        let mut state = self.lock();
        let Some(props) = self.props(&mut state, false)? else {
            return Ok(None);
        };
        let value = props
            .read(PropSpec::Name(name))
            .map_err(StorageError::backend("read name map", name))?;
        Ok(value.as_ref().and_then(PropertyValue::as_guid))
    }

    pub fn try_map_guid_to_name(&self, guid: Guid) -> StorageResult<Option<String>> {
        let mut state = self.lock();
        let Some(props) = self.props(&mut state, false)? else {
            return Ok(None);
        };
        Ok(self
            .entries(props)?
            .into_iter()
            .find(|e| e.guid == guid)
            .map(|e| e.name))
    }

    pub fn map_name_to_guid(&self, name: &str) -> StorageResult<Guid> {
        self.try_map_name_to_guid(name)?
            .ok_or_else(|| StorageError::not_found(EntityKind::Mapping, name))
    }

    pub fn map_guid_to_name(&self, guid: Guid) -> StorageResult<String> {
        self.try_map_guid_to_name(guid)?
            .ok_or_else(|| StorageError::not_found(EntityKind::Mapping, guid))
    }

    pub fn remove_mapping_by_name(&self, name: &str) -> StorageResult<()> {
        let mut state = self.lock();
        let props = self.writable_props(&mut state)?;
        let removed = props
            .delete(PropSpec::Name(name))
            .map_err(StorageError::backend("delete name map entry", name))?;
        if !removed {
            return Err(StorageError::not_found(EntityKind::Mapping, name));
        }
        self.commit(props)?;
        debug!(fmtid = %self.fmtid, name, "mapping removed");
        Ok(())
    }

    pub fn remove_mapping_by_guid(&self, guid: Guid) -> StorageResult<()> {
        let mut state = self.lock();
        let props = self.writable_props(&mut state)?;
        let entry = self
            .entries(props)?
            .into_iter()
            .find(|e| e.guid == guid)
            .ok_or_else(|| StorageError::not_found(EntityKind::Mapping, guid))?;
        props
            .delete(PropSpec::Id(entry.prop_id))
            .map_err(StorageError::backend("delete name map entry", &entry.name))?;
        self.commit(props)?;
        debug!(fmtid = %self.fmtid, name = %entry.name, %guid, "mapping removed");
        Ok(())
    }

    /// Bind `new_name` to an existing GUID in place.
    ///
    /// Renaming to a case variant of the current name is allowed.
    pub fn rename_mapping(&self, guid: Guid, new_name: &str) -> StorageResult<()> {
        validate_name(new_name, DEFAULT_MAX_NAME_LEN)?;
        let mut state = self.lock();
        let props = self.writable_props(&mut state)?;
        let entries = self.entries(props)?;
        let entry = entries
            .iter()
            .find(|e| e.guid == guid)
            .ok_or_else(|| StorageError::not_found(EntityKind::Mapping, guid))?;
        if entries
            .iter()
            .any(|e| e.guid != guid && eq_ignore_case(&e.name, new_name))
        {
            return Err(StorageError::already_exists(EntityKind::Mapping, new_name));
        }
        if entry.name == new_name {
            return Ok(());
        }
        props
            .rename(entry.prop_id, new_name)
            .map_err(StorageError::backend("rename name map entry", new_name))?;
        self.commit(props)?;
        debug!(fmtid = %self.fmtid, from = %entry.name, to = new_name, %guid, "mapping renamed");
        Ok(())
    }

    /// Snapshot of the whole mapping.
    pub fn to_map(&self) -> StorageResult<BTreeMap<String, Guid>> {
        let mut state = self.lock();
        let Some(props) = self.props(&mut state, false)? else {
            return Ok(BTreeMap::new());
        };
        Ok(self
            .entries(props)?
            .into_iter()
            .map(|e| (e.name, e.guid))
            .collect())
    }

    pub fn count(&self) -> StorageResult<usize> {
        let mut state = self.lock();
        match self.props(&mut state, false)? {
            Some(props) => Ok(self.entries(props)?.len()),
            None => Ok(0),
        }
    }

    pub fn contains_name(&self, name: &str) -> StorageResult<bool> {
        Ok(self.try_map_name_to_guid(name)?.is_some())
    }

    pub fn contains_guid(&self, guid: Guid) -> StorageResult<bool> {
        Ok(self.try_map_guid_to_name(guid)?.is_some())
    }

    /// Release the backing property set. Later calls fail with disposed-access.
    pub(crate) fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        state.props = None;
    }
}

impl fmt::Debug for NameMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameMapper")
            .field("fmtid", &self.fmtid)
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CachedHandle;
    use proptest::prelude::*;
    use std::sync::Arc;
    use stow_store::{
        create_document, create_temp_document, open_document, Disposition, FormatOptions,
        StorageAccess,
    };
    use stow_types::fmtid::CONTAINER_NAME_MAPPER;

    fn temp_handle() -> Arc<StorageHandle> {
        StorageHandle::new(
            Guid::nil(),
            create_temp_document(FormatOptions::default()).unwrap(),
        )
    }

    fn has_map(handle: &StorageHandle) -> bool {
        handle
            .with_storage(|s| Ok(s.enum_property_sets().unwrap()))
            .unwrap()
            .contains(&CONTAINER_NAME_MAPPER)
    }

    // ---- lookups ----

    #[test]
    fn add_and_resolve_both_ways() {
        let handle = temp_handle();
        let mapper = &handle.containers;
        let g = Guid::new_v4();
        mapper.add_mapping("Docs", g).unwrap();

        assert_eq!(mapper.map_name_to_guid("docs").unwrap(), g);
        assert_eq!(mapper.map_guid_to_name(g).unwrap(), "Docs");
        assert!(mapper.contains_name("DOCS").unwrap());
        assert!(mapper.contains_guid(g).unwrap());
        assert_eq!(mapper.count().unwrap(), 1);
    }

    #[test]
    fn misses_are_none_or_not_found() {
        let handle = temp_handle();
        let mapper = &handle.objects;
        assert_eq!(mapper.try_map_name_to_guid("nope").unwrap(), None);
        assert_eq!(mapper.try_map_guid_to_name(Guid::new_v4()).unwrap(), None);
        assert!(matches!(
            mapper.map_name_to_guid("nope"),
            Err(StorageError::NotFound {
                kind: EntityKind::Mapping,
                ..
            })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected_case_insensitively() {
        let handle = temp_handle();
        let mapper = &handle.containers;
        mapper.add_mapping("Docs", Guid::new_v4()).unwrap();
        let err = mapper.add_mapping("DOCS", Guid::new_v4()).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(mapper.count().unwrap(), 1);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let handle = temp_handle();
        assert!(handle.containers.add_mapping("", Guid::new_v4()).is_err());
        assert!(handle
            .containers
            .add_mapping("bad\nname", Guid::new_v4())
            .is_err());
    }

    // ---- lazy creation ----

    #[test]
    fn backing_set_is_created_by_first_write() {
        let handle = temp_handle();
        assert_eq!(handle.containers.count().unwrap(), 0);
        assert!(handle.containers.to_map().unwrap().is_empty());
        assert!(!has_map(&handle));

        handle.containers.add_mapping("a", Guid::new_v4()).unwrap();
        assert!(has_map(&handle));
    }

    // ---- removal and rename ----

    #[test]
    fn remove_by_name_and_by_guid() {
        let handle = temp_handle();
        let mapper = &handle.property_sets;
        let a = Guid::new_v4();
        let b = Guid::new_v4();
        mapper.add_mapping("a", a).unwrap();
        mapper.add_mapping("b", b).unwrap();

        mapper.remove_mapping_by_name("A").unwrap();
        mapper.remove_mapping_by_guid(b).unwrap();
        assert_eq!(mapper.count().unwrap(), 0);

        assert!(matches!(
            mapper.remove_mapping_by_name("a"),
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            mapper.remove_mapping_by_guid(b),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn rename_keeps_guid() {
        let handle = temp_handle();
        let mapper = &handle.containers;
        let g = Guid::new_v4();
        let other = Guid::new_v4();
        mapper.add_mapping("old", g).unwrap();
        mapper.add_mapping("taken", other).unwrap();

        mapper.rename_mapping(g, "new").unwrap();
        assert_eq!(mapper.map_name_to_guid("new").unwrap(), g);
        assert_eq!(mapper.try_map_name_to_guid("old").unwrap(), None);

        mapper.rename_mapping(g, "NEW").unwrap();
        assert_eq!(mapper.map_guid_to_name(g).unwrap(), "NEW");

        assert!(matches!(
            mapper.rename_mapping(g, "Taken"),
            Err(StorageError::AlreadyExists { .. })
        ));
        assert!(matches!(
            mapper.rename_mapping(Guid::new_v4(), "x"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn snapshot_lists_every_entry() {
        let handle = temp_handle();
        let mapper = &handle.objects;
        let ids: Vec<Guid> = (0..3).map(|_| Guid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            mapper.add_mapping(&format!("obj{i}"), *id).unwrap();
        }
        let map = mapper.to_map().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["obj1"], ids[1]);
    }

    // ---- read-only and disposal ----

    #[test]
    fn read_only_node_without_map_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.stow");
        drop(create_document(&path, Disposition::CreateNew, FormatOptions::default()).unwrap());

        let root = open_document(&path, StorageAccess::ReadOnlyShared).unwrap();
        let handle = StorageHandle::new(Guid::nil(), root);
        let mapper = &handle.containers;
        assert_eq!(mapper.count().unwrap(), 0);
        assert_eq!(mapper.try_map_name_to_guid("x").unwrap(), None);
        assert!(matches!(
            mapper.add_mapping("x", Guid::new_v4()),
            Err(StorageError::ReadOnly(EntityKind::Mapping))
        ));
    }

    #[test]
    fn mappings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.stow");
        let g = Guid::new_v4();
        {
            let root =
                create_document(&path, Disposition::CreateNew, FormatOptions::default()).unwrap();
            let handle = StorageHandle::new(Guid::nil(), root);
            handle.containers.add_mapping("kept", g).unwrap();
            handle.dispose();
        }
        let root = open_document(&path, StorageAccess::ReadOnlyExclusive).unwrap();
        let handle = StorageHandle::new(Guid::nil(), root);
        assert_eq!(handle.containers.map_name_to_guid("KEPT").unwrap(), g);
    }

    #[test]
    fn disposed_mapper_fails() {
        let handle = temp_handle();
        handle.containers.add_mapping("a", Guid::new_v4()).unwrap();
        handle.dispose();
        assert!(matches!(
            handle.containers.count(),
            Err(StorageError::Disposed(_))
        ));
    }

    proptest! {
        #[test]
        fn lookup_ignores_case(name in "[a-zA-Z][a-zA-Z0-9 _.-]{0,40}") {
            let handle = temp_handle();
            let g = Guid::new_v4();
            handle.objects.add_mapping(&name, g).unwrap();
            prop_assert_eq!(handle.objects.try_map_name_to_guid(&name.to_uppercase()).unwrap(), Some(g));
            prop_assert_eq!(handle.objects.try_map_name_to_guid(&name.to_lowercase()).unwrap(), Some(g));
            prop_assert_eq!(handle.objects.map_guid_to_name(g).unwrap(), name);
        }
    }
}
