use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::image;
use crate::mode::{Disposition, FormatOptions, StorageAccess};
use crate::node::{StorageNode, StorageState};
use crate::storage::Storage;

/// Openers of one file in this process.
#[derive(Default)]
struct Holders {
    exclusive: bool,
    shared: usize,
}

fn open_documents() -> &'static Mutex<HashMap<PathBuf, Holders>> {
    static OPEN: OnceLock<Mutex<HashMap<PathBuf, Holders>>> = OnceLock::new();
    OPEN.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A claim on a file path in the process-wide open-document registry.
///
/// Released on drop.
struct Registration {
    key: PathBuf,
    exclusive: bool,
}

impl Registration {
    fn acquire(path: &Path, access: StorageAccess) -> StoreResult<Self> {
        let key = registry_key(path)?;
        let mut open = open_documents()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let holders = open.entry(key.clone()).or_default();
        let conflict = holders.exclusive || (access.is_exclusive() && holders.shared > 0);
        if conflict {
            return Err(StoreError::AccessDenied(format!(
                "{} is in use by another storage",
                path.display()
            )));
        }
        if access.is_exclusive() {
            holders.exclusive = true;
        } else {
            holders.shared += 1;
        }
        Ok(Self {
            key,
            exclusive: access.is_exclusive(),
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut open = open_documents()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(holders) = open.get_mut(&self.key) {
            if self.exclusive {
                holders.exclusive = false;
            } else {
                holders.shared = holders.shared.saturating_sub(1);
            }
            if !holders.exclusive && holders.shared == 0 {
                open.remove(&self.key);
            }
        }
    }
}

/// Canonical key for a path that may not exist yet.
fn registry_key(path: &Path) -> StoreResult<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| StoreError::InvalidName {
        name: path.display().to_string(),
        reason: "path has no file name".into(),
    })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(std::fs::canonicalize(parent)?.join(file_name))
}

enum Backing {
    File(PathBuf),
    Temp(NamedTempFile),
}

/// State shared by every handle of one open document.
pub(crate) struct DocumentShared {
    root: Arc<StorageNode>,
    backing: Backing,
    options: FormatOptions,
    access: StorageAccess,
    dirty: AtomicBool,
    closed: AtomicBool,
    registration: Mutex<Option<Registration>>,
}

impl DocumentShared {
    pub(crate) fn is_writable(&self) -> bool {
        self.access.access_mode().is_writable()
    }

    pub(crate) fn access(&self) -> StorageAccess {
        self.access
    }

    pub(crate) fn is_temporary(&self) -> bool {
        matches!(self.backing, Backing::Temp(_))
    }

    pub(crate) fn path(&self) -> &Path {
        match &self.backing {
            Backing::File(path) => path,
            Backing::Temp(file) => file.path(),
        }
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Reverted);
        }
        Ok(())
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn root_node(&self) -> &Arc<StorageNode> {
        &self.root
    }

    /// Write the tree to the backing file if anything changed.
    pub(crate) fn persist(&self) -> StoreResult<()> {
        self.ensure_open()?;
        if !self.is_writable() || !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let bytes = match image::encode(&self.root, self.options) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.mark_dirty();
                return Err(e);
            }
        };
        if let Err(e) = self.write_image(&bytes) {
            self.mark_dirty();
            return Err(e);
        }
        debug!(path = %self.path().display(), bytes = bytes.len(), "image persisted");
        Ok(())
    }

    fn write_image(&self, bytes: &[u8]) -> StoreResult<()> {
        match &self.backing {
            Backing::File(path) => write_atomically(path, bytes),
            Backing::Temp(file) => {
                std::fs::write(file.path(), bytes)?;
                Ok(())
            }
        }
    }

    /// Persist pending changes and release the path registration.
    pub(crate) fn close(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let result = self.persist();
        self.closed.store(true, Ordering::Release);
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(path = %self.path().display(), "document closed");
        result
    }
}

/// Write through a temporary file in the same directory, then rename over
/// the target.
fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Create a document at `path` and return its root storage.
///
/// The document is opened read-write-exclusive.
pub fn create_document(
    path: &Path,
    disposition: Disposition,
    options: FormatOptions,
) -> StoreResult<Storage> {
    let access = StorageAccess::ReadWriteExclusive;
    let registration = Registration::acquire(path, access)?;
    match disposition {
        Disposition::Create => {}
        Disposition::CreateNew => {
            if path.exists() {
                return Err(StoreError::AlreadyExists(path.display().to_string()));
            }
        }
        Disposition::OpenExisting => return open_registered(path, access, registration),
    }

    let shared = Arc::new(DocumentShared {
        root: StorageNode::new(StorageState::default()),
        backing: Backing::File(path.to_path_buf()),
        options,
        access,
        dirty: AtomicBool::new(true),
        closed: AtomicBool::new(false),
        registration: Mutex::new(Some(registration)),
    });
    // The file exists from creation on, even before the first commit.
    shared.persist()?;
    info!(path = %path.display(), ?disposition, "document created");
    Storage::root(shared)
}

/// Create an anonymous document backed by a temporary file.
///
/// The file is deleted when the root storage is released.
pub fn create_temp_document(options: FormatOptions) -> StoreResult<Storage> {
    let file = NamedTempFile::new()?;
    let shared = Arc::new(DocumentShared {
        root: StorageNode::new(StorageState::default()),
        backing: Backing::Temp(file),
        options,
        access: StorageAccess::ReadWriteExclusive,
        dirty: AtomicBool::new(true),
        closed: AtomicBool::new(false),
        registration: Mutex::new(None),
    });
    shared.persist()?;
    info!(path = %shared.path().display(), "temporary document created");
    Storage::root(shared)
}

/// Open an existing document and return its root storage.
pub fn open_document(path: &Path, access: StorageAccess) -> StoreResult<Storage> {
    let registration = Registration::acquire(path, access)?;
    open_registered(path, access, registration)
}

fn open_registered(
    path: &Path,
    access: StorageAccess,
    registration: Registration,
) -> StoreResult<Storage> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let (root, options) = image::decode(&bytes)?;
    let shared = Arc::new(DocumentShared {
        root,
        backing: Backing::File(path.to_path_buf()),
        options,
        access,
        dirty: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        registration: Mutex::new(Some(registration)),
    });
    info!(path = %path.display(), ?access, bytes = bytes.len(), "document opened");
    Storage::root(shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.stow");
        let root = create_document(&path, Disposition::CreateNew, FormatOptions::default()).unwrap();
        drop(root);
        assert!(matches!(
            create_document(&path, Disposition::CreateNew, FormatOptions::default()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.stow");
        assert!(matches!(
            open_document(&path, StorageAccess::ReadOnlyShared),
            Err(StoreError::NotFound(_))
        ));
        // The failed open must not leave a registration behind.
        create_document(&path, Disposition::Create, FormatOptions::default()).unwrap();
    }

    #[test]
    fn exclusive_open_blocks_second_opener() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.stow");
        let root = create_document(&path, Disposition::Create, FormatOptions::default()).unwrap();
        assert!(matches!(
            open_document(&path, StorageAccess::ReadOnlyShared),
            Err(StoreError::AccessDenied(_))
        ));
        drop(root);
        let again = open_document(&path, StorageAccess::ReadOnlyShared).unwrap();
        drop(again);
    }

    #[test]
    fn shared_readers_coexist_but_deny_writers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.stow");
        drop(create_document(&path, Disposition::Create, FormatOptions::default()).unwrap());

        let r1 = open_document(&path, StorageAccess::ReadOnlyShared).unwrap();
        let r2 = open_document(&path, StorageAccess::ReadOnlyShared).unwrap();
        assert!(matches!(
            open_document(&path, StorageAccess::ReadWriteExclusive),
            Err(StoreError::AccessDenied(_))
        ));
        drop(r1);
        drop(r2);
        open_document(&path, StorageAccess::ReadWriteExclusive).unwrap();
    }

    #[test]
    fn temp_document_file_is_removed_on_release() {
        let root = create_temp_document(FormatOptions::default()).unwrap();
        let path = root.document_path().to_path_buf();
        assert!(path.exists());
        drop(root);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.stow");
        std::fs::write(&path, b"this is not an image file at all").unwrap();
        assert!(matches!(
            open_document(&path, StorageAccess::ReadOnlyExclusive),
            Err(StoreError::InvalidMagic { .. })
        ));
    }
}
