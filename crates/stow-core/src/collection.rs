//! The child collections of a container.
//!
//! Sub-containers, objects and property sets share one implementation,
//! [`Collection`], parameterized by a [`ChildKind`] that knows how to create,
//! open and destroy the physical child and which mapper and cache it uses.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::vec;

use stow_types::names::{validate_name, DEFAULT_MAX_NAME_LEN};
use stow_types::Guid;
use tracing::{debug, warn};

use crate::cache::HandleCache;
use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::StorageHandle;
use crate::mapper::NameMapper;
use crate::session::Session;
use crate::traits::CachedHandle;

/// How one kind of child is stored under its parent.
pub trait ChildKind: 'static {
    /// The shared handle cached per child.
    type Handle: CachedHandle;
    /// The wrapper handed to callers.
    type Item;

    const ENTITY: EntityKind;

    fn mapper(parent: &StorageHandle) -> &NameMapper;

    fn cache(session: &Session) -> &HandleCache<Self::Handle>;

    /// Physically create the child stored under `id`.
    fn create(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<Self::Handle>>;

    /// Physically open the child stored under `id` with the parent's access.
    fn open(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<Self::Handle>>;

    /// Physically destroy the child stored under `id`.
    fn destroy(parent: &StorageHandle, id: Guid) -> StorageResult<()>;

    /// GUIDs of every physical child of this kind, in storage order.
    ///
    /// Children whose physical name does not decode to a GUID are skipped.
    fn physical_ids(parent: &StorageHandle) -> StorageResult<Vec<Guid>>;

    fn wrap(
        session: Weak<Session>,
        parent: Arc<StorageHandle>,
        handle: Arc<Self::Handle>,
    ) -> Self::Item;
}

/// The children of one kind under one container.
///
/// Names are resolved through the parent's name mapper; handles are shared
/// through the session cache, so every wrapper for the same child is backed
/// by the same open handle.
pub struct Collection<K: ChildKind> {
    session: Weak<Session>,
    parent: Arc<StorageHandle>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ChildKind> Clone for Collection<K> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            parent: self.parent.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ChildKind> Collection<K> {
    pub(crate) fn new(session: Weak<Session>, parent: Arc<StorageHandle>) -> Self {
        Self {
            session,
            parent,
            _kind: PhantomData,
        }
    }

    fn session(&self) -> StorageResult<Arc<Session>> {
        let session = self
            .session
            .upgrade()
            .ok_or(StorageError::Disposed(EntityKind::Storage))?;
        session.ensure_open()?;
        Ok(session)
    }

    fn mapper(&self) -> &NameMapper {
        K::mapper(&self.parent)
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.parent.is_read_only() {
            return Err(StorageError::ReadOnly(K::ENTITY));
        }
        Ok(())
    }

    fn wrap(&self, handle: Arc<K::Handle>) -> K::Item {
        K::wrap(self.session.clone(), self.parent.clone(), handle)
    }

    pub fn is_read_only(&self) -> bool {
        self.parent.is_read_only()
    }

    /// Create a child named `name`.
    ///
    /// The child is stored under a fresh GUID. It is cached before its name
    /// is registered; if registration fails the physical child is destroyed
    /// again.
    pub fn add(&self, name: &str) -> StorageResult<K::Item> {
        validate_name(name, DEFAULT_MAX_NAME_LEN)?;
        let session = self.session()?;
        self.ensure_writable()?;
        if self.mapper().contains_name(name)? {
            return Err(StorageError::already_exists(K::ENTITY, name));
        }

        let id = Guid::new_v4();
        let handle = K::create(&self.parent, id)?;
        let cache = K::cache(&session);
        if let Err(e) = cache.add(id, &handle) {
            self.discard(id, &handle);
            return Err(e);
        }
        if let Err(e) = self.mapper().add_mapping(name, id) {
            cache.remove(id);
            self.discard(id, &handle);
            return Err(e.for_entity(K::ENTITY));
        }
        debug!(kind = %K::ENTITY, name, %id, "child added");
        Ok(self.wrap(handle))
    }

    /// Best-effort removal of a child whose registration failed.
    fn discard(&self, id: Guid, handle: &K::Handle) {
        handle.dispose();
        if let Err(e) = K::destroy(&self.parent, id) {
            warn!(kind = %K::ENTITY, %id, error = %e, "failed to roll back orphaned child");
        }
    }

    /// The child named `name`.
    pub fn get(&self, name: &str) -> StorageResult<K::Item> {
        self.session()?;
        let id = self
            .mapper()
            .try_map_name_to_guid(name)?
            .ok_or_else(|| StorageError::not_found(K::ENTITY, name))?;
        self.get_by_id(id)
    }

    /// The child named `name`, created first if it does not exist.
    ///
    /// A read-only collection fails with not-found on a miss.
    pub fn get_or_add(&self, name: &str) -> StorageResult<K::Item> {
        self.session()?;
        if let Some(id) = self.mapper().try_map_name_to_guid(name)? {
            return self.get_by_id(id);
        }
        if self.is_read_only() {
            return Err(StorageError::not_found(K::ENTITY, name));
        }
        match self.add(name) {
            Err(StorageError::AlreadyExists { .. }) => self.get(name),
            result => result,
        }
    }

    /// The child stored under `id`.
    ///
    /// A live cached handle is reused; otherwise the child is opened and
    /// cached while the cache lock is held.
    pub fn get_by_id(&self, id: Guid) -> StorageResult<K::Item> {
        let session = self.session()?;
        let parent = &self.parent;
        let handle = K::cache(&session)
            .get_or_open(id, || session.retry_sharing(|| K::open(parent, id)))?;
        Ok(self.wrap(handle))
    }

    /// The child at `index` in physical storage order.
    ///
    /// This enumerates the parent's children on every call. Children this
    /// collection did not create are not counted.
    pub fn get_at(&self, index: usize) -> StorageResult<K::Item> {
        self.session()?;
        let mapped: HashSet<Guid> = self.mapper().to_map()?.into_values().collect();
        let ids: Vec<Guid> = K::physical_ids(&self.parent)?
            .into_iter()
            .filter(|id| mapped.contains(id))
            .collect();
        let id = *ids.get(index).ok_or(StorageError::IndexOutOfRange {
            index,
            count: ids.len(),
        })?;
        self.get_by_id(id)
    }

    /// Destroy the child named `name`. Returns `false` if there is none.
    pub fn remove(&self, name: &str) -> StorageResult<bool> {
        let session = self.session()?;
        self.ensure_writable()?;
        let Some(id) = self.mapper().try_map_name_to_guid(name)? else {
            return Ok(false);
        };
        self.remove_id(&session, id)?;
        debug!(kind = %K::ENTITY, name, %id, "child removed");
        Ok(true)
    }

    fn remove_id(&self, session: &Session, id: Guid) -> StorageResult<()> {
        K::cache(session).remove(id);
        match K::destroy(&self.parent, id) {
            Ok(()) => {}
            Err(StorageError::NotFound { .. }) => {
                debug!(kind = %K::ENTITY, %id, "mapped child was already gone");
            }
            Err(e) => return Err(e),
        }
        self.mapper().remove_mapping_by_guid(id)
    }

    /// Destroy every child.
    ///
    /// Works through a snapshot of the mapping and is not atomic: a failure
    /// part way leaves the remaining children in place.
    pub fn clear(&self) -> StorageResult<()> {
        let session = self.session()?;
        self.ensure_writable()?;
        let snapshot = self.mapper().to_map()?;
        let count = snapshot.len();
        for id in snapshot.into_values() {
            self.remove_id(&session, id)?;
        }
        debug!(kind = %K::ENTITY, count, "collection cleared");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> StorageResult<bool> {
        self.session()?;
        self.mapper().contains_name(name)
    }

    pub fn count(&self) -> StorageResult<usize> {
        self.session()?;
        self.mapper().count()
    }

    /// Names of every child, sorted.
    pub fn names(&self) -> StorageResult<Vec<String>> {
        self.session()?;
        Ok(self.mapper().to_map()?.into_keys().collect())
    }

    /// Iterate over a snapshot of the children taken now.
    ///
    /// Children are opened lazily as the iterator advances. Children added
    /// later are not seen; children removed in the meantime yield
    /// not-found.
    pub fn iter(&self) -> StorageResult<Snapshot<K>> {
        self.session()?;
        let entries: Vec<(String, Guid)> = self.mapper().to_map()?.into_iter().collect();
        Ok(Snapshot {
            collection: self.clone(),
            entries: entries.into_iter(),
        })
    }
}

impl<K: ChildKind> fmt::Debug for Collection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &K::ENTITY)
            .field("parent", &self.parent.id())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// Iterator over a snapshot of a [`Collection`].
pub struct Snapshot<K: ChildKind> {
    collection: Collection<K>,
    entries: vec::IntoIter<(String, Guid)>,
}

impl<K: ChildKind> Snapshot<K> {
    /// Entries not yet visited.
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

impl<K: ChildKind> Iterator for Snapshot<K> {
    type Item = StorageResult<K::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let (name, id) = self.entries.next()?;
        Some(self.collection.get_by_id(id).map_err(|e| match e {
            StorageError::NotFound { kind, .. } => StorageError::NotFound { kind, name },
            other => other,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K: ChildKind> ExactSizeIterator for Snapshot<K> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::StructuredStorage;
    use std::thread;

    // ---- add / get ----

    #[test]
    fn add_is_unique_per_collection() {
        let store = StructuredStorage::create_temp().unwrap();
        let root = store.root().unwrap();

        root.containers().add("a").unwrap();
        let err = root.containers().add("A").unwrap_err();
        assert!(matches!(
            err,
            StorageError::AlreadyExists {
                kind: EntityKind::Container,
                ..
            }
        ));

        // Each collection has its own namespace.
        root.objects().add("a").unwrap();
        root.property_sets().add("a").unwrap();
        assert!(root.objects().add("a").is_err());
        assert!(root.property_sets().add("a").is_err());
    }

    #[test]
    fn get_misses_with_not_found() {
        let store = StructuredStorage::create_temp().unwrap();
        let err = store.containers().unwrap().get("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!store.containers().unwrap().contains("missing").unwrap());
    }

    #[test]
    fn get_or_add_creates_once() {
        let store = StructuredStorage::create_temp().unwrap();
        let objects = store.objects().unwrap();
        let first = objects.get_or_add("log").unwrap();
        let second = objects.get_or_add("LOG").unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(objects.count().unwrap(), 1);
    }

    #[test]
    fn invalid_names_are_rejected_before_any_change() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let err = containers.add("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(containers.count().unwrap(), 0);
    }

    // ---- identity ----

    #[test]
    fn wrappers_share_one_handle() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let added = containers.add("shared").unwrap();
        let by_name = containers.get("shared").unwrap();
        let by_iter = containers.iter().unwrap().next().unwrap().unwrap();
        assert!(Arc::ptr_eq(added.handle(), by_name.handle()));
        assert!(Arc::ptr_eq(added.handle(), by_iter.handle()));

        drop(added);
        drop(by_iter);
        assert_eq!(by_name.name().unwrap(), "shared");
    }

    #[test]
    fn dropped_child_is_reopened_on_demand() {
        let store = StructuredStorage::create_temp().unwrap();
        let objects = store.objects().unwrap();
        let id = objects.add("o").unwrap().id();
        let again = objects.get("o").unwrap();
        assert_eq!(again.id(), id);
    }

    #[test]
    fn concurrent_resolution_converges() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let keep = containers.add("hot").unwrap();
        drop(keep);

        let threads: Vec<_> = (0..6)
            .map(|_| {
                let containers = containers.clone();
                thread::spawn(move || containers.get("hot").unwrap())
            })
            .collect();
        let found: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(found
            .windows(2)
            .all(|w| Arc::ptr_eq(w[0].handle(), w[1].handle())));
    }

    #[test]
    fn concurrent_add_of_one_name_has_one_winner() {
        let store = StructuredStorage::create_temp().unwrap();
        let objects = store.objects().unwrap();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let objects = objects.clone();
                thread::spawn(move || objects.add("race").is_ok())
            })
            .collect();
        let wins = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(objects.count().unwrap(), 1);
        assert_eq!(
            store
                .root()
                .unwrap()
                .handle()
                .with_storage(|s| Ok(s.enum_elements().unwrap().len()))
                .unwrap(),
            1
        );
    }

    // ---- index access ----

    #[test]
    fn get_at_walks_physical_children() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let mut ids: Vec<Guid> = ["x", "y", "z"]
            .iter()
            .map(|n| containers.add(n).unwrap().id())
            .collect();
        ids.sort_by_key(|id| id.to_storage_name());

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(containers.get_at(i).unwrap().id(), *id);
        }
        assert!(matches!(
            containers.get_at(3),
            Err(StorageError::IndexOutOfRange { index: 3, count: 3 })
        ));
    }

    // ---- remove / clear ----

    #[test]
    fn remove_reports_presence() {
        let store = StructuredStorage::create_temp().unwrap();
        let sets = store.property_sets().unwrap();
        let set = sets.add("meta").unwrap();
        assert!(sets.remove("META").unwrap());
        assert!(!sets.remove("meta").unwrap());
        assert!(!sets.contains("meta").unwrap());
        assert_eq!(set.get("x").unwrap_err().kind(), ErrorKind::Disposed);
    }

    #[test]
    fn removing_a_container_disposes_held_descendants() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let docs = containers.add("docs").unwrap();
        let object = docs.objects().add("o").unwrap();
        object.set_data(b"abc").unwrap();
        let sub = docs.containers().add("sub").unwrap();
        let meta = docs.property_sets().add("meta").unwrap();
        meta.set("k", 1i32).unwrap();

        assert!(containers.remove("docs").unwrap());

        assert_eq!(object.data().unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(object.set_data(b"x").unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(meta.get("k").unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(meta.set("k", 2i32).unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(sub.objects().add("x").unwrap_err().kind(), ErrorKind::Disposed);
        assert!(matches!(
            object.data(),
            Err(StorageError::Disposed(EntityKind::Object))
        ));
    }

    #[test]
    fn removed_name_can_be_reused() {
        let store = StructuredStorage::create_temp().unwrap();
        let objects = store.objects().unwrap();
        let first = objects.add("o").unwrap().id();
        objects.remove("o").unwrap();
        let second = objects.add("o").unwrap().id();
        assert_ne!(first, second);
    }

    #[test]
    fn clear_destroys_everything() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        for name in ["a", "b", "c"] {
            containers.add(name).unwrap();
        }
        containers.clear().unwrap();
        assert_eq!(containers.count().unwrap(), 0);
        assert!(containers.names().unwrap().is_empty());
        assert!(matches!(
            containers.get_at(0),
            Err(StorageError::IndexOutOfRange { .. })
        ));
    }

    // ---- snapshots ----

    #[test]
    fn snapshot_ignores_later_changes() {
        let store = StructuredStorage::create_temp().unwrap();
        let objects = store.objects().unwrap();
        for name in ["a", "b", "c"] {
            objects.add(name).unwrap();
        }

        let snapshot = objects.iter().unwrap();
        assert_eq!(snapshot.remaining(), 3);
        objects.remove("b").unwrap();
        objects.add("d").unwrap();

        let results: Vec<_> = snapshot.collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().name().unwrap(), "a");
        assert!(matches!(
            &results[1],
            Err(StorageError::NotFound { name, .. }) if name == "b"
        ));
        assert_eq!(results[2].as_ref().unwrap().name().unwrap(), "c");
    }

    #[test]
    fn names_are_sorted() {
        let store = StructuredStorage::create_temp().unwrap();
        let sets = store.property_sets().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            sets.add(name).unwrap();
        }
        assert_eq!(sets.names().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn closed_store_refuses_collection_work() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        store.close().unwrap();
        assert_eq!(
            containers.add("late").unwrap_err().kind(),
            ErrorKind::Disposed
        );
        assert_eq!(containers.count().unwrap_err().kind(), ErrorKind::Disposed);
    }
}
