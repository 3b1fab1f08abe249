use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use stow_store::{Storage, StoreError};
use stow_types::{fmtid, Guid};
use tracing::{debug, info, warn};

use crate::cache::HandleCache;
use crate::config::StorageConfig;
use crate::error::{EntityKind, StorageError, StorageResult};
use crate::handle::{PropertySetHandle, StorageHandle, StreamHandle};
use crate::traits::CachedHandle;

/// State shared by every wrapper of one open store.
///
/// Wrappers reach the session through a `Weak` reference; only the owning
/// [`crate::StructuredStorage`] holds it strongly.
pub struct Session {
    path: Option<PathBuf>,
    config: StorageConfig,
    root: Arc<StorageHandle>,
    summary: Option<Arc<PropertySetHandle>>,
    pub(crate) storages: HandleCache<StorageHandle>,
    pub(crate) streams: HandleCache<StreamHandle>,
    pub(crate) property_sets: HandleCache<PropertySetHandle>,
    closed: AtomicBool,
}

impl Session {
    /// Wrap an open root storage.
    ///
    /// On failure the root storage is dropped, which releases the document.
    pub(crate) fn new(
        root: Storage,
        path: Option<PathBuf>,
        config: StorageConfig,
    ) -> StorageResult<Arc<Self>> {
        let summary = open_summary(&root)?;
        Ok(Arc::new(Self {
            path,
            config,
            root: StorageHandle::new(Guid::nil(), root),
            summary,
            storages: HandleCache::new(),
            streams: HandleCache::new(),
            property_sets: HandleCache::new(),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn root(&self) -> &Arc<StorageHandle> {
        &self.root
    }

    pub(crate) fn summary(&self) -> Option<&Arc<PropertySetHandle>> {
        self.summary.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.root.is_read_only()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Disposed(EntityKind::Storage));
        }
        Ok(())
    }

    /// Write every pending change to the backing file.
    pub(crate) fn flush(&self) -> StorageResult<()> {
        self.ensure_open()?;
        self.root.with_storage(|storage| {
            storage
                .commit()
                .map_err(StorageError::backend("flush", self.display_path()))
        })?;
        debug!(path = %self.display_path(), "store flushed");
        Ok(())
    }

    /// Commit, then tear down every cached handle, the summary set and the
    /// root. Closing twice is a no-op.
    pub(crate) fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let committed = if self.is_read_only() {
            Ok(())
        } else {
            self.root.with_storage(|storage| {
                storage
                    .commit()
                    .map_err(StorageError::backend("commit", self.display_path()))
            })
        };
        self.storages.dispose();
        self.streams.dispose();
        self.property_sets.dispose();
        if let Some(summary) = &self.summary {
            summary.dispose();
        }
        self.root.dispose();
        info!(path = %self.display_path(), "store closed");
        committed
    }

    /// Run a child open, retrying once after the configured delay if the
    /// node is still held by another handle.
    pub(crate) fn retry_sharing<T>(
        &self,
        mut open: impl FnMut() -> StorageResult<T>,
    ) -> StorageResult<T> {
        match (open(), self.config.sharing_retry) {
            (Err(e), Some(delay)) if e.is_sharing_violation() => {
                warn!(error = %e, ?delay, "child open hit a sharing violation; retrying once");
                thread::sleep(delay);
                open()
            }
            (result, _) => result,
        }
    }

    fn display_path(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "<temporary>".to_string(),
        }
    }
}

/// Open the summary-information set on the root, creating it when the root
/// is writable. A read-only root without one yields `None`.
fn open_summary(root: &Storage) -> StorageResult<Option<Arc<PropertySetHandle>>> {
    let fmtid = fmtid::SUMMARY_INFORMATION;
    match root.open_property_set(fmtid, root.mode()) {
        Ok(props) => Ok(Some(PropertySetHandle::new(props))),
        Err(StoreError::NotFound(_)) if root.mode().is_writable() => root
            .create_property_set(fmtid)
            .map(|props| Some(PropertySetHandle::new(props)))
            .map_err(StorageError::backend("create summary information", fmtid)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(StorageError::backend("open summary information", fmtid)(e)),
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("read_only", &self.is_read_only())
            .field("closed", &self.is_closed())
            .field("storages", &self.storages)
            .field("streams", &self.streams)
            .field("property_sets", &self.property_sets)
            .finish()
    }
}
