use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use stow_types::Guid;
use tracing::debug;

use crate::error::{EntityKind, StorageError, StorageResult};
use crate::traits::CachedHandle;

struct CacheState<T> {
    entries: HashMap<Guid, Weak<T>>,
    disposed: bool,
}

/// GUID-keyed registry of live handles.
///
/// At most one live handle exists per GUID. Entries are weak: the cache
/// never keeps a handle open, and an entry whose handle was dropped or
/// disposed counts as absent. All operations are serialized by one lock.
pub struct HandleCache<T: CachedHandle> {
    state: Mutex<CacheState<T>>,
}

fn live<T: CachedHandle>(entry: &Weak<T>) -> Option<Arc<T>> {
    entry.upgrade().filter(|h| !h.is_disposed())
}

impl<T: CachedHandle> HandleCache<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                disposed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_open(&self) -> StorageResult<MutexGuard<'_, CacheState<T>>> {
        let state = self.lock();
        if state.disposed {
            return Err(StorageError::Disposed(EntityKind::Storage));
        }
        Ok(state)
    }

    /// Register a handle.
    ///
    /// Fails if a live handle is already registered under `id`; a dead entry
    /// is silently replaced.
    pub fn add(&self, id: Guid, handle: &Arc<T>) -> StorageResult<()> {
        let mut state = self.lock_open()?;
        if state.entries.get(&id).and_then(live).is_some() {
            return Err(StorageError::already_exists(EntityKind::CachedHandle, id));
        }
        if state.entries.insert(id, Arc::downgrade(handle)).is_some() {
            debug!(%id, "replaced dead cache entry");
        }
        Ok(())
    }

    /// The live handle for `id`, if any.
    pub fn try_get(&self, id: Guid) -> Option<Arc<T>> {
        let state = self.lock();
        if state.disposed {
            return None;
        }
        state.entries.get(&id).and_then(live)
    }

    /// Return the live handle for `id`, or open and register a new one.
    ///
    /// Lookup, open and insertion happen under one lock acquisition, so
    /// concurrent callers resolving the same GUID converge on one handle.
    pub fn get_or_open<F>(&self, id: Guid, open: F) -> StorageResult<Arc<T>>
    where
        F: FnOnce() -> StorageResult<Arc<T>>,
    {
        let mut state = self.lock_open()?;
        if let Some(handle) = state.entries.get(&id).and_then(live) {
            return Ok(handle);
        }
        let handle = open()?;
        state.entries.insert(id, Arc::downgrade(&handle));
        Ok(handle)
    }

    /// Drop the entry for `id`, disposing its handle if still live.
    ///
    /// Returns `true` if a live handle was registered.
    pub fn remove(&self, id: Guid) -> bool {
        let removed = self.lock().entries.remove(&id);
        match removed.as_ref().and_then(live) {
            Some(handle) => {
                handle.dispose();
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a live handle is registered under `id`.
    pub fn contains(&self, id: Guid) -> bool {
        self.try_get(id).is_some()
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|entry| live(entry).is_some())
            .count()
    }

    /// Dispose every live handle and empty the cache.
    pub fn clear(&self) {
        let drained: Vec<Weak<T>> = self.lock().entries.drain().map(|(_, e)| e).collect();
        let mut disposed = 0usize;
        for handle in drained.iter().filter_map(live) {
            handle.dispose();
            disposed += 1;
        }
        debug!(disposed, "cache cleared");
    }

    /// Clear the cache and refuse further registrations.
    pub fn dispose(&self) {
        self.lock().disposed = true;
        self.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

impl<T: CachedHandle> Default for HandleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CachedHandle> fmt::Debug for HandleCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCache")
            .field("live", &self.count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
