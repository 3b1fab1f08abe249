use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use stow_types::Guid;
use tracing::{debug, warn};

use crate::document::DocumentShared;
use crate::error::{StoreError, StoreResult};
use crate::mode::{flags, AccessMode};
use crate::node::{
    mark_element_removed, Element, PropertySetNode, PropertySetState, StorageNode, StorageState,
    StreamNode, StreamState,
};
use crate::propset::PropertyStorage;
use crate::stream::Stream;

/// Longest element name the store accepts, in characters.
pub const MAX_ELEMENT_NAME_LEN: usize = 31;

/// Characters that are forbidden anywhere in an element name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '!'];

/// The type of a storage element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Storage,
    Stream,
}

/// Basic information about an element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    pub name: String,
    pub kind: ElementKind,
    /// Stream length in bytes; zero for storages.
    pub size: u64,
    pub mode_flags: u32,
}

/// Validate an element name.
pub fn validate_element_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: String| StoreError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("element name must not be empty".into()));
    }
    if name.chars().count() > MAX_ELEMENT_NAME_LEN {
        return Err(invalid(format!(
            "longer than {MAX_ELEMENT_NAME_LEN} characters"
        )));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
    {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    Ok(())
}

/// An open storage node.
///
/// Child storages and streams are always opened exclusively: opening an
/// element that another handle holds fails with
/// [`StoreError::AccessDenied`]. Dropping the root storage persists pending
/// changes and closes the document.
pub struct Storage {
    node: Arc<StorageNode>,
    name: String,
    mode: AccessMode,
    doc: Arc<DocumentShared>,
    is_root: bool,
}

impl Storage {
    pub(crate) fn root(doc: Arc<DocumentShared>) -> StoreResult<Self> {
        let node = doc.root_node().clone();
        node.try_open("root storage")?;
        Ok(Self {
            node,
            name: String::new(),
            mode: doc.access().access_mode(),
            doc,
            is_root: true,
        })
    }

    fn child(&self, node: Arc<StorageNode>, name: &str, mode: AccessMode) -> StoreResult<Self> {
        node.try_open(name)?;
        Ok(Self {
            node,
            name: name.to_string(),
            mode,
            doc: self.doc.clone(),
            is_root: false,
        })
    }

    /// Element name; empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Path of the backing file.
    pub fn document_path(&self) -> &Path {
        self.doc.path()
    }

    /// Returns `true` for documents created without a path.
    pub fn is_temporary(&self) -> bool {
        self.doc.is_temporary()
    }

    fn live(&self) -> StoreResult<RwLockReadGuard<'_, StorageState>> {
        self.doc.ensure_open()?;
        let state = self.node.read();
        state.ensure_live()?;
        Ok(state)
    }

    fn live_mut(&self) -> StoreResult<RwLockWriteGuard<'_, StorageState>> {
        self.doc.ensure_open()?;
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly);
        }
        let state = self.node.write();
        state.ensure_live()?;
        Ok(state)
    }

    fn check_child_mode(&self, mode: AccessMode) -> StoreResult<()> {
        if mode.is_writable() && !self.mode.is_writable() {
            return Err(StoreError::AccessDenied(
                "cannot open a writable child under a read-only storage".into(),
            ));
        }
        Ok(())
    }

    fn insert_element(&self, name: &str, element: Element) -> StoreResult<()> {
        validate_element_name(name)?;
        let mut state = self.live_mut()?;
        if state.elements.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        state.elements.insert(name.to_string(), element);
        self.doc.mark_dirty();
        Ok(())
    }

    fn element(&self, name: &str) -> StoreResult<Element> {
        self.live()?
            .elements
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Create a child storage and open it with this storage's access.
    pub fn create_storage(&self, name: &str) -> StoreResult<Storage> {
        let node = StorageNode::new(StorageState::default());
        self.insert_element(name, Element::Storage(node.clone()))?;
        debug!(parent = %self.name, name, "storage created");
        self.child(node, name, self.mode)
    }

    /// Open an existing child storage.
    pub fn open_storage(&self, name: &str, mode: AccessMode) -> StoreResult<Storage> {
        self.check_child_mode(mode)?;
        match self.element(name)? {
            Element::Storage(node) => self.child(node, name, mode),
            Element::Stream(_) => Err(StoreError::NotFound(format!("{name} is not a storage"))),
        }
    }

    /// Create a child stream and open it with this storage's access.
    pub fn create_stream(&self, name: &str) -> StoreResult<Stream> {
        let node = StreamNode::new(StreamState::default());
        self.insert_element(name, Element::Stream(node.clone()))?;
        debug!(parent = %self.name, name, "stream created");
        Stream::open(node, name, self.mode, self.doc.clone())
    }

    /// Open an existing child stream, positioned at offset zero.
    pub fn open_stream(&self, name: &str, mode: AccessMode) -> StoreResult<Stream> {
        self.check_child_mode(mode)?;
        match self.element(name)? {
            Element::Stream(node) => Stream::open(node, name, mode, self.doc.clone()),
            Element::Storage(_) => Err(StoreError::NotFound(format!("{name} is not a stream"))),
        }
    }

    /// Destroy a child element and everything below it.
    ///
    /// Handles still open on the destroyed element revert.
    pub fn destroy_element(&self, name: &str) -> StoreResult<()> {
        let removed = self
            .live_mut()?
            .elements
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        mark_element_removed(&removed);
        self.doc.mark_dirty();
        debug!(parent = %self.name, name, "element destroyed");
        Ok(())
    }

    /// Enumerate direct children.
    pub fn enum_elements(&self) -> StoreResult<Vec<StatInfo>> {
        let state = self.live()?;
        Ok(state
            .elements
            .iter()
            .map(|(name, element)| match element {
                Element::Storage(_) => StatInfo {
                    name: name.clone(),
                    kind: ElementKind::Storage,
                    size: 0,
                    mode_flags: 0,
                },
                Element::Stream(node) => StatInfo {
                    name: name.clone(),
                    kind: ElementKind::Stream,
                    size: node.read().data.len() as u64,
                    mode_flags: 0,
                },
            })
            .collect())
    }

    pub fn stat(&self) -> StoreResult<StatInfo> {
        self.live().map(|_| ())?;
        let share = if self.is_root {
            self.doc.access().flags()
        } else {
            self.mode.flags() | flags::SHARE_EXCLUSIVE
        };
        let temp = if self.doc.is_temporary() {
            flags::DELETE_ON_RELEASE
        } else {
            0
        };
        Ok(StatInfo {
            name: self.name.clone(),
            kind: ElementKind::Storage,
            size: 0,
            mode_flags: share | temp,
        })
    }

    pub fn state_bits(&self) -> StoreResult<u32> {
        Ok(self.live()?.state_bits)
    }

    /// Set the bits selected by `mask` to the corresponding bits of `bits`.
    pub fn set_state_bits(&self, bits: u32, mask: u32) -> StoreResult<()> {
        let mut state = self.live_mut()?;
        state.state_bits = (state.state_bits & !mask) | (bits & mask);
        self.doc.mark_dirty();
        Ok(())
    }

    /// Commit pending changes.
    ///
    /// Storages run in direct mode: every change is visible immediately, and
    /// committing the root writes the whole document to its backing file.
    pub fn commit(&self) -> StoreResult<()> {
        self.live().map(|_| ())?;
        if self.is_root {
            self.doc.persist()?;
        }
        Ok(())
    }

    /// Discard uncommitted changes. A no-op in direct mode.
    pub fn revert(&self) -> StoreResult<()> {
        self.live().map(|_| ())
    }

    /// Create a property set and open it with this storage's access.
    pub fn create_property_set(&self, fmtid: Guid) -> StoreResult<PropertyStorage> {
        let node = PropertySetNode::new(PropertySetState::default());
        {
            let mut state = self.live_mut()?;
            if state.property_sets.contains_key(&fmtid) {
                return Err(StoreError::AlreadyExists(fmtid.to_string()));
            }
            state.property_sets.insert(fmtid, node.clone());
        }
        self.doc.mark_dirty();
        debug!(parent = %self.name, %fmtid, "property set created");
        PropertyStorage::open(node, fmtid, self.mode, self.doc.clone())
    }

    pub fn open_property_set(&self, fmtid: Guid, mode: AccessMode) -> StoreResult<PropertyStorage> {
        self.check_child_mode(mode)?;
        let node = self
            .live()?
            .property_sets
            .get(&fmtid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(fmtid.to_string()))?;
        PropertyStorage::open(node, fmtid, mode, self.doc.clone())
    }

    pub fn delete_property_set(&self, fmtid: Guid) -> StoreResult<()> {
        let removed = self
            .live_mut()?
            .property_sets
            .remove(&fmtid)
            .ok_or_else(|| StoreError::NotFound(fmtid.to_string()))?;
        removed.write().removed = true;
        self.doc.mark_dirty();
        debug!(parent = %self.name, %fmtid, "property set deleted");
        Ok(())
    }

    /// Format ids of every property set on this storage.
    pub fn enum_property_sets(&self) -> StoreResult<Vec<Guid>> {
        Ok(self.live()?.property_sets.keys().copied().collect())
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.node.release();
        if self.is_root {
            if let Err(e) = self.doc.close() {
                warn!(path = %self.doc.path().display(), error = %e, "failed to persist document on release");
            }
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("root", &self.is_root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::create_temp_document;
    use crate::mode::FormatOptions;

    fn temp_root() -> Storage {
        create_temp_document(FormatOptions::default()).unwrap()
    }

    #[test]
    fn create_open_and_enumerate() {
        let root = temp_root();
        drop(root.create_storage("a").unwrap());
        drop(root.create_stream("b").unwrap());

        let elements = root.enum_elements().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].kind, ElementKind::Storage);
        assert_eq!(elements[1].kind, ElementKind::Stream);

        let a = root.open_storage("a", AccessMode::ReadWrite).unwrap();
        assert_eq!(a.name(), "a");
        assert!(matches!(
            root.open_stream("a", AccessMode::Read),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_create_fails() {
        let root = temp_root();
        drop(root.create_storage("dup").unwrap());
        assert!(matches!(
            root.create_stream("dup"),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn second_open_is_denied_until_release() {
        let root = temp_root();
        let first = root.create_storage("x").unwrap();
        assert!(matches!(
            root.open_storage("x", AccessMode::ReadWrite),
            Err(StoreError::AccessDenied(_))
        ));
        drop(first);
        root.open_storage("x", AccessMode::ReadWrite).unwrap();
    }

    #[test]
    fn destroyed_element_reverts_open_handles() {
        let root = temp_root();
        let child = root.create_storage("gone").unwrap();
        drop(child.create_stream("inner").unwrap());
        root.destroy_element("gone").unwrap();
        assert!(matches!(child.enum_elements(), Err(StoreError::Reverted)));
        assert!(matches!(child.commit(), Err(StoreError::Reverted)));
        assert!(matches!(child.revert(), Err(StoreError::Reverted)));
        assert!(matches!(child.stat(), Err(StoreError::Reverted)));
        assert!(matches!(
            root.destroy_element("gone"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_element_names() {
        assert!(validate_element_name("ok").is_ok());
        assert!(validate_element_name("").is_err());
        assert!(validate_element_name("a/b").is_err());
        assert!(validate_element_name("bang!").is_err());
        assert!(validate_element_name(&"n".repeat(32)).is_err());
        let root = temp_root();
        assert!(matches!(
            root.create_storage("a:b"),
            Err(StoreError::InvalidName { .. })
        ));
    }

    #[test]
    fn property_sets_by_fmtid() {
        let root = temp_root();
        let fmtid = Guid::new_v4();
        drop(root.create_property_set(fmtid).unwrap());
        assert!(matches!(
            root.create_property_set(fmtid),
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(root.enum_property_sets().unwrap(), vec![fmtid]);
        root.delete_property_set(fmtid).unwrap();
        assert!(matches!(
            root.open_property_set(fmtid, AccessMode::Read),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn state_bits_respect_mask() {
        let root = temp_root();
        root.set_state_bits(0b1111, 0b0101).unwrap();
        assert_eq!(root.state_bits().unwrap(), 0b0101);
    }

    #[test]
    fn temp_root_reports_delete_on_release() {
        let root = temp_root();
        let stat = root.stat().unwrap();
        assert_ne!(stat.mode_flags & flags::DELETE_ON_RELEASE, 0);
        assert!(root.is_temporary());
    }
}
