use std::fmt;
use std::sync::{Arc, Weak};

use stow_store::ElementKind;
use stow_types::names::{validate_name, DEFAULT_MAX_NAME_LEN};
use stow_types::Guid;
use tracing::debug;

use crate::cache::HandleCache;
use crate::collection::{ChildKind, Collection};
use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::StorageHandle;
use crate::mapper::NameMapper;
use crate::object::ObjectKind;
use crate::property_set::PropertySetKind;
use crate::session::Session;
use crate::traits::CachedHandle;

/// Name reported by every root container.
pub const ROOT_CONTAINER_NAME: &str = "StorageRoot";

/// Sub-containers of a container.
pub type Containers = Collection<ContainerKind>;
/// Objects of a container.
pub type Objects = Collection<ObjectKind>;
/// Property sets of a container.
pub type PropertySets = Collection<PropertySetKind>;

/// Sub-containers: child storages named by the storage-safe form of their
/// GUID.
pub struct ContainerKind;

impl ChildKind for ContainerKind {
    type Handle = StorageHandle;
    type Item = Container;

    const ENTITY: EntityKind = EntityKind::Container;

    fn mapper(parent: &StorageHandle) -> &NameMapper {
        &parent.containers
    }

    fn cache(session: &Session) -> &HandleCache<StorageHandle> {
        &session.storages
    }

    fn create(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<StorageHandle>> {
        let name = id.to_storage_name();
        let storage = parent.with_storage(|s| {
            s.create_storage(&name)
                .map_err(StorageError::backend("create container", id))
        })?;
        Ok(StorageHandle::new(id, storage))
    }

    fn open(parent: &StorageHandle, id: Guid) -> StorageResult<Arc<StorageHandle>> {
        let name = id.to_storage_name();
        let mode = parent.access_mode();
        let storage = parent.with_storage(|s| {
            s.open_storage(&name, mode)
                .map_err(StorageError::on_open("open container", EntityKind::Container, id))
        })?;
        Ok(StorageHandle::new(id, storage))
    }

    fn destroy(parent: &StorageHandle, id: Guid) -> StorageResult<()> {
        parent.with_storage(|s| {
            s.destroy_element(&id.to_storage_name())
                .map_err(StorageError::on_open("destroy container", EntityKind::Container, id))
        })
    }

    fn physical_ids(parent: &StorageHandle) -> StorageResult<Vec<Guid>> {
        element_ids(parent, ElementKind::Storage)
    }

    fn wrap(
        session: Weak<Session>,
        parent: Arc<StorageHandle>,
        handle: Arc<StorageHandle>,
    ) -> Container {
        Container {
            session,
            parent: Some(parent),
            handle,
        }
    }
}

/// GUIDs of the children of `kind`, skipping names that are not GUID
/// encodings.
pub(crate) fn element_ids(parent: &StorageHandle, kind: ElementKind) -> StorageResult<Vec<Guid>> {
    let elements = parent.with_storage(|s| {
        s.enum_elements()
            .map_err(StorageError::backend("enumerate children", parent.id()))
    })?;
    Ok(elements
        .into_iter()
        .filter(|e| e.kind == kind)
        .filter_map(|e| Guid::from_storage_name(&e.name))
        .collect())
}

/// A node holding sub-containers, objects and property sets.
///
/// Cloning is cheap; every clone shares the open handle.
#[derive(Clone)]
pub struct Container {
    session: Weak<Session>,
    parent: Option<Arc<StorageHandle>>,
    handle: Arc<StorageHandle>,
}

impl Container {
    pub(crate) fn root(session: &Arc<Session>) -> Self {
        Self {
            session: Arc::downgrade(session),
            parent: None,
            handle: session.root().clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &Arc<StorageHandle> {
        &self.handle
    }

    /// The GUID this container is stored under; nil for the root.
    pub fn id(&self) -> Guid {
        self.handle.id()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_read_only(&self) -> bool {
        self.handle.is_read_only()
    }

    pub fn name(&self) -> StorageResult<String> {
        self.handle.ensure_live()?;
        match &self.parent {
            None => Ok(ROOT_CONTAINER_NAME.to_string()),
            Some(parent) => parent
                .containers
                .map_guid_to_name(self.id())
                .map_err(|e| e.for_entity(EntityKind::Container)),
        }
    }

    /// Rename this container. The root cannot be renamed.
    pub fn set_name(&self, name: &str) -> StorageResult<()> {
        let Some(parent) = &self.parent else {
            return Err(StorageError::InvalidArgument(
                "the root container cannot be renamed".into(),
            ));
        };
        validate_name(name, DEFAULT_MAX_NAME_LEN)?;
        self.handle.ensure_live()?;
        if parent.is_read_only() {
            return Err(StorageError::ReadOnly(EntityKind::Container));
        }
        parent
            .containers
            .rename_mapping(self.id(), name)
            .map_err(|e| e.for_entity(EntityKind::Container))?;
        debug!(id = %self.id(), name, "container renamed");
        Ok(())
    }

    pub fn containers(&self) -> Containers {
        Collection::new(self.session.clone(), self.handle.clone())
    }

    pub fn objects(&self) -> Objects {
        Collection::new(self.session.clone(), self.handle.clone())
    }

    pub fn property_sets(&self) -> PropertySets {
        Collection::new(self.session.clone(), self.handle.clone())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("root", &self.is_root())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::StructuredStorage;

    #[test]
    fn root_has_fixed_name() {
        let store = StructuredStorage::create_temp().unwrap();
        let root = store.root().unwrap();
        assert!(root.is_root());
        assert!(root.id().is_nil());
        assert_eq!(root.name().unwrap(), ROOT_CONTAINER_NAME);
        assert_eq!(
            root.set_name("other").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn rename_round_trip() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let docs = containers.add("docs").unwrap();
        assert_eq!(docs.name().unwrap(), "docs");

        docs.set_name("papers").unwrap();
        assert_eq!(docs.name().unwrap(), "papers");
        assert!(!containers.contains("docs").unwrap());
        assert_eq!(containers.get("papers").unwrap().id(), docs.id());

        // Case-only rename.
        docs.set_name("Papers").unwrap();
        assert_eq!(docs.name().unwrap(), "Papers");
    }

    #[test]
    fn rename_onto_sibling_fails() {
        let store = StructuredStorage::create_temp().unwrap();
        let containers = store.containers().unwrap();
        let a = containers.add("a").unwrap();
        containers.add("b").unwrap();
        assert!(matches!(
            a.set_name("B"),
            Err(StorageError::AlreadyExists {
                kind: EntityKind::Container,
                ..
            })
        ));
        assert_eq!(a.name().unwrap(), "a");
    }

    #[test]
    fn nested_containers_have_their_own_namespace() {
        let store = StructuredStorage::create_temp().unwrap();
        let outer = store.containers().unwrap().add("outer").unwrap();
        let inner = outer.containers().add("outer").unwrap();
        let leaf = inner.containers().add("leaf").unwrap();
        assert!(!inner.is_root());
        assert_eq!(leaf.name().unwrap(), "leaf");
        assert_eq!(outer.containers().count().unwrap(), 1);
        assert_eq!(store.containers().unwrap().count().unwrap(), 1);
    }

    #[test]
    fn physical_names_are_guid_encodings() {
        let store = StructuredStorage::create_temp().unwrap();
        let root = store.root().unwrap();
        let child = root.containers().add("visible").unwrap();
        let ids = element_ids(root.handle(), ElementKind::Storage).unwrap();
        assert_eq!(ids, vec![child.id()]);
        root.handle()
            .with_storage(|s| {
                let names: Vec<String> =
                    s.enum_elements().unwrap().into_iter().map(|e| e.name).collect();
                assert_eq!(names, vec![child.id().to_storage_name()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn foreign_children_are_ignored() {
        let store = StructuredStorage::create_temp().unwrap();
        let root = store.root().unwrap();
        root.handle()
            .with_storage(|s| {
                drop(s.create_storage("not-a-guid").unwrap());
                Ok(())
            })
            .unwrap();
        root.containers().add("mine").unwrap();
        assert_eq!(element_ids(root.handle(), ElementKind::Storage).unwrap().len(), 1);
        assert_eq!(root.containers().get_at(0).unwrap().name().unwrap(), "mine");
    }

    #[test]
    fn wrappers_fail_after_close() {
        let store = StructuredStorage::create_temp().unwrap();
        let docs = store.containers().unwrap().add("docs").unwrap();
        store.close().unwrap();
        assert_eq!(docs.name().unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(docs.set_name("x").unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(
            docs.objects().add("x").unwrap_err().kind(),
            ErrorKind::Disposed
        );
    }
}
