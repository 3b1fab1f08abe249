use std::fmt;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use stow_types::names::eq_ignore_case;
use stow_types::{Guid, PropertyValue, ValueKind};

use crate::document::DocumentShared;
use crate::error::{StoreError, StoreResult};
use crate::mode::AccessMode;
use crate::node::{Property, PropertySetNode, PropertySetState};

/// Selects a property by name or by numeric id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropSpec<'a> {
    Name(&'a str),
    Id(u32),
}

/// Information about one property, as returned by enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyStat {
    pub id: u32,
    pub name: Option<String>,
    pub kind: ValueKind,
}

/// Information about a property set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySetStat {
    pub fmtid: Guid,
    pub count: usize,
}

/// An open property set.
///
/// Names compare case-insensitively. Named properties are allocated ids in
/// increasing order; enumeration is in id order.
pub struct PropertyStorage {
    node: Arc<PropertySetNode>,
    fmtid: Guid,
    mode: AccessMode,
    doc: Arc<DocumentShared>,
}

impl PropertyStorage {
    pub(crate) fn open(
        node: Arc<PropertySetNode>,
        fmtid: Guid,
        mode: AccessMode,
        doc: Arc<DocumentShared>,
    ) -> StoreResult<Self> {
        node.try_open(&fmtid.to_string())?;
        Ok(Self {
            node,
            fmtid,
            mode,
            doc,
        })
    }

    pub fn fmtid(&self) -> Guid {
        self.fmtid
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    fn live(&self) -> StoreResult<RwLockReadGuard<'_, PropertySetState>> {
        self.doc.ensure_open()?;
        let state = self.node.read();
        state.ensure_live()?;
        Ok(state)
    }

    fn live_mut(&self) -> StoreResult<RwLockWriteGuard<'_, PropertySetState>> {
        self.doc.ensure_open()?;
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly);
        }
        let state = self.node.write();
        state.ensure_live()?;
        Ok(state)
    }

    fn resolve(state: &PropertySetState, spec: PropSpec<'_>) -> Option<u32> {
        match spec {
            PropSpec::Name(name) => state.id_of(name),
            PropSpec::Id(id) => state.properties.contains_key(&id).then_some(id),
        }
    }

    /// Read one property. Returns `Ok(None)` if it does not exist.
    pub fn read(&self, spec: PropSpec<'_>) -> StoreResult<Option<PropertyValue>> {
        let state = self.live()?;
        Ok(Self::resolve(&state, spec)
            .and_then(|id| state.properties.get(&id))
            .map(|p| p.value.clone()))
    }

    /// Write a named property, overwriting an existing value of that name.
    ///
    /// New names are allocated an id no lower than `first_id`. Returns the
    /// property's id.
    pub fn write(&self, name: &str, value: PropertyValue, first_id: u32) -> StoreResult<u32> {
        if name.is_empty() {
            return Err(StoreError::InvalidName {
                name: String::new(),
                reason: "property name must not be empty".into(),
            });
        }
        let mut state = self.live_mut()?;
        let id = match state.id_of(name) {
            Some(id) => id,
            None => state.allocate_id(first_id),
        };
        let prop = state.properties.entry(id).or_insert_with(|| Property {
            name: Some(name.to_string()),
            value: value.clone(),
        });
        prop.value = value;
        drop(state);
        self.doc.mark_dirty();
        Ok(id)
    }

    /// Write a property by id, keeping any name already bound to it.
    pub fn write_id(&self, id: u32, value: PropertyValue) -> StoreResult<()> {
        let mut state = self.live_mut()?;
        match state.properties.get_mut(&id) {
            Some(prop) => prop.value = value,
            None => {
                state.properties.insert(id, Property { name: None, value });
            }
        }
        drop(state);
        self.doc.mark_dirty();
        Ok(())
    }

    /// Delete one property. Returns `true` if it existed.
    pub fn delete(&self, spec: PropSpec<'_>) -> StoreResult<bool> {
        let mut state = self.live_mut()?;
        let removed = match Self::resolve(&state, spec) {
            Some(id) => state.properties.remove(&id).is_some(),
            None => false,
        };
        drop(state);
        if removed {
            self.doc.mark_dirty();
        }
        Ok(removed)
    }

    /// List every property in id order.
    pub fn enumerate(&self) -> StoreResult<Vec<PropertyStat>> {
        let state = self.live()?;
        Ok(state
            .properties
            .iter()
            .map(|(id, p)| PropertyStat {
                id: *id,
                name: p.name.clone(),
                kind: p.value.kind(),
            })
            .collect())
    }

    /// Bind a new name to an existing property id.
    ///
    /// Fails if another property already uses the name. Renaming a property
    /// to a case variant of its own name is allowed.
    pub fn rename(&self, id: u32, new_name: &str) -> StoreResult<()> {
        if new_name.is_empty() {
            return Err(StoreError::InvalidName {
                name: String::new(),
                reason: "property name must not be empty".into(),
            });
        }
        let mut state = self.live_mut()?;
        if !state.properties.contains_key(&id) {
            return Err(StoreError::NotFound(format!("property id {id}")));
        }
        if let Some(other) = state.id_of(new_name).filter(|other| *other != id) {
            return Err(StoreError::AlreadyExists(format!(
                "{new_name} (property id {other})"
            )));
        }
        if let Some(prop) = state.properties.get_mut(&id) {
            prop.name = Some(new_name.to_string());
        }
        drop(state);
        self.doc.mark_dirty();
        Ok(())
    }

    /// Commit pending writes. Property sets run in direct mode, so this only
    /// checks that the handle is still valid.
    pub fn commit(&self) -> StoreResult<()> {
        self.live().map(|_| ())
    }

    pub fn stat(&self) -> StoreResult<PropertySetStat> {
        Ok(PropertySetStat {
            fmtid: self.fmtid,
            count: self.live()?.properties.len(),
        })
    }

    /// Returns `true` if a property with this name exists.
    pub fn contains(&self, name: &str) -> StoreResult<bool> {
        Ok(self
            .live()?
            .properties
            .values()
            .any(|p| p.name.as_deref().is_some_and(|n| eq_ignore_case(n, name))))
    }
}

impl Drop for PropertyStorage {
    fn drop(&mut self) {
        self.node.release();
    }
}

impl fmt::Debug for PropertyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStorage")
            .field("fmtid", &self.fmtid)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::create_temp_document;
    use crate::mode::FormatOptions;
    use crate::storage::Storage;

    fn temp_set() -> (Storage, PropertyStorage) {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let set = root.create_property_set(Guid::new_v4()).unwrap();
        (root, set)
    }

    #[test]
    fn write_read_by_name_and_id() {
        let (_root, set) = temp_set();
        let id = set.write("Title", PropertyValue::from("Readme"), 255).unwrap();
        assert_eq!(id, 255);
        assert_eq!(
            set.read(PropSpec::Name("title")).unwrap(),
            Some(PropertyValue::from("Readme"))
        );
        assert_eq!(
            set.read(PropSpec::Id(255)).unwrap(),
            Some(PropertyValue::from("Readme"))
        );
        assert_eq!(set.read(PropSpec::Name("missing")).unwrap(), None);
    }

    #[test]
    fn overwrite_keeps_id_and_original_name() {
        let (_root, set) = temp_set();
        let first = set.write("count", PropertyValue::I32(1), 255).unwrap();
        let second = set.write("COUNT", PropertyValue::I32(2), 255).unwrap();
        assert_eq!(first, second);
        let stats = set.enumerate().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name.as_deref(), Some("count"));
        assert_eq!(stats[0].kind, ValueKind::I32);
    }

    #[test]
    fn delete_reports_presence() {
        let (_root, set) = temp_set();
        set.write("a", PropertyValue::Bool(true), 2).unwrap();
        assert!(set.delete(PropSpec::Name("A")).unwrap());
        assert!(!set.delete(PropSpec::Name("a")).unwrap());
        assert_eq!(set.stat().unwrap().count, 0);
    }

    #[test]
    fn rename_rules() {
        let (_root, set) = temp_set();
        let a = set.write("a", PropertyValue::U8(1), 2).unwrap();
        set.write("b", PropertyValue::U8(2), 2).unwrap();

        assert!(matches!(
            set.rename(a, "B"),
            Err(StoreError::AlreadyExists(_))
        ));
        set.rename(a, "A").unwrap();
        assert!(set.contains("a").unwrap());
        set.rename(a, "c").unwrap();
        assert!(!set.contains("a").unwrap());
        assert!(matches!(set.rename(999, "z"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn write_by_id_is_unnamed() {
        let (_root, set) = temp_set();
        set.write_id(2, PropertyValue::from("title")).unwrap();
        let stats = set.enumerate().unwrap();
        assert_eq!(stats[0].id, 2);
        assert_eq!(stats[0].name, None);
    }

    #[test]
    fn read_only_set_rejects_writes() {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let fmtid = Guid::new_v4();
        drop(root.create_property_set(fmtid).unwrap());
        let set = root.open_property_set(fmtid, AccessMode::Read).unwrap();
        assert!(matches!(
            set.write("x", PropertyValue::Bool(true), 2),
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(
            set.delete(PropSpec::Id(2)),
            Err(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn deleted_set_reverts() {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let fmtid = Guid::new_v4();
        let set = root.create_property_set(fmtid).unwrap();
        root.delete_property_set(fmtid).unwrap();
        assert!(matches!(set.enumerate(), Err(StoreError::Reverted)));
    }
}
