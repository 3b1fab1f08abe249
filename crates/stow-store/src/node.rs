use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stow_types::names::eq_ignore_case;
use stow_types::{Guid, PropertyValue};

use crate::error::{StoreError, StoreResult};

/// Lowest id handed out to a named property.
pub(crate) const FIRST_PROPERTY_ID: u32 = 2;

/// One node of the in-memory tree.
///
/// The `open` flag enforces exclusive opens: a second open of a node that is
/// already held by a handle fails with access-denied.
pub(crate) struct Node<S> {
    state: RwLock<S>,
    open: AtomicBool,
}

impl<S> Node<S> {
    pub(crate) fn new(state: S) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(state),
            open: AtomicBool::new(false),
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, S> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the node for a new handle.
    pub(crate) fn try_open(&self, name: &str) -> StoreResult<()> {
        self.open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| StoreError::AccessDenied(format!("{name} is already open")))
    }

    pub(crate) fn release(&self) {
        self.open.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

pub(crate) type StorageNode = Node<StorageState>;
pub(crate) type StreamNode = Node<StreamState>;
pub(crate) type PropertySetNode = Node<PropertySetState>;

/// A child element of a storage.
#[derive(Clone)]
pub(crate) enum Element {
    Storage(Arc<StorageNode>),
    Stream(Arc<StreamNode>),
}

#[derive(Default)]
pub(crate) struct StorageState {
    pub(crate) elements: BTreeMap<String, Element>,
    pub(crate) property_sets: BTreeMap<Guid, Arc<PropertySetNode>>,
    pub(crate) state_bits: u32,
    pub(crate) removed: bool,
}

impl StorageState {
    pub(crate) fn ensure_live(&self) -> StoreResult<()> {
        if self.removed {
            return Err(StoreError::Reverted);
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct StreamState {
    pub(crate) data: Vec<u8>,
    pub(crate) locks: Vec<RegionLock>,
    pub(crate) removed: bool,
}

impl StreamState {
    pub(crate) fn ensure_live(&self) -> StoreResult<()> {
        if self.removed {
            return Err(StoreError::Reverted);
        }
        Ok(())
    }
}

/// A byte range held by one stream handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RegionLock {
    pub(crate) owner: u64,
    pub(crate) offset: u64,
    pub(crate) len: u64,
}

impl RegionLock {
    pub(crate) fn overlaps(&self, offset: u64, len: u64) -> bool {
        let end = offset.saturating_add(len);
        let own_end = self.offset.saturating_add(self.len);
        offset < own_end && self.offset < end
    }
}

pub(crate) struct Property {
    pub(crate) name: Option<String>,
    pub(crate) value: PropertyValue,
}

pub(crate) struct PropertySetState {
    pub(crate) properties: BTreeMap<u32, Property>,
    pub(crate) next_id: u32,
    pub(crate) removed: bool,
}

impl Default for PropertySetState {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            next_id: FIRST_PROPERTY_ID,
            removed: false,
        }
    }
}

impl PropertySetState {
    pub(crate) fn ensure_live(&self) -> StoreResult<()> {
        if self.removed {
            return Err(StoreError::Reverted);
        }
        Ok(())
    }

    /// Find the id of a named property, comparing names case-insensitively.
    pub(crate) fn id_of(&self, name: &str) -> Option<u32> {
        self.properties.iter().find_map(|(id, prop)| {
            prop.name
                .as_deref()
                .filter(|n| eq_ignore_case(n, name))
                .map(|_| *id)
        })
    }

    /// Allocate the next free id, no lower than `first_id`.
    pub(crate) fn allocate_id(&mut self, first_id: u32) -> u32 {
        let mut id = self.next_id.max(first_id);
        while self.properties.contains_key(&id) {
            id += 1;
        }
        self.next_id = id + 1;
        id
    }
}

/// Mark a storage and everything below it as destroyed.
///
/// Handles still referring to any of these nodes fail with
/// [`StoreError::Reverted`] from then on.
pub(crate) fn mark_storage_removed(node: &StorageNode) {
    let mut state = node.write();
    state.removed = true;
    for element in state.elements.values() {
        mark_element_removed(element);
    }
    for set in state.property_sets.values() {
        set.write().removed = true;
    }
}

pub(crate) fn mark_element_removed(element: &Element) {
    match element {
        Element::Storage(node) => mark_storage_removed(node),
        Element::Stream(node) => node.write().removed = true,
    }
}
