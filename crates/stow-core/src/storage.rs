//! Opening, flushing and closing a store.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stow_store::{create_document, create_temp_document, open_document, Disposition, StoreError};
use tracing::{info, warn};

pub use stow_store::StorageAccess;

use crate::config::StorageConfig;
use crate::container::{Container, Containers, Objects, PropertySets};
use crate::error::{EntityKind, StorageError, StorageResult};
use crate::session::Session;
use crate::summary::SummaryInformation;

/// How [`StructuredStorage::open`] treats the target file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    /// Create a new file, replacing any existing one.
    Create,
    /// Create a new file, failing if one exists.
    CreateNew,
    /// Open an existing file.
    Open,
    /// Open the file if it exists, otherwise create it.
    OpenOrCreate,
}

impl OpenMode {
    fn creates(&self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::CreateNew)
    }
}

/// An open store: the root container plus the summary information.
///
/// Dropping the store closes it. Wrappers obtained from a store stay valid
/// as values but fail with [`StorageError::Disposed`] once it is closed.
pub struct StructuredStorage {
    session: Arc<Session>,
}

impl StructuredStorage {
    /// Open or create a store with the default configuration.
    ///
    /// `None` as the path creates an anonymous store on a temporary file
    /// that is deleted on close.
    pub fn open(path: Option<&Path>, mode: OpenMode, access: StorageAccess) -> StorageResult<Self> {
        Self::open_with_config(path, mode, access, StorageConfig::default())
    }

    pub fn open_with_config(
        path: Option<&Path>,
        mode: OpenMode,
        access: StorageAccess,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        let mode = resolve_mode(path, mode)?;
        if mode.creates() && access != StorageAccess::ReadWriteExclusive {
            return Err(StorageError::InvalidArgument(format!(
                "{mode:?} requires read-write exclusive access, got {access:?}"
            )));
        }

        let options = config.format_options();
        let root = match (path, mode) {
            (None, _) => create_temp_document(options)
                .map_err(StorageError::backend("create temporary store", "<temporary>"))?,
            (Some(path), OpenMode::Create) => create_document(path, Disposition::Create, options)
                .map_err(open_error("create store", path))?,
            (Some(path), OpenMode::CreateNew) => {
                create_document(path, Disposition::CreateNew, options)
                    .map_err(open_error("create store", path))?
            }
            (Some(path), _) => {
                open_document(path, access).map_err(open_error("open store", path))?
            }
        };

        let session = Session::new(root, path.map(Path::to_path_buf), config)?;
        info!(
            path = %path.map_or_else(|| "<temporary>".into(), |p| p.display().to_string()),
            ?mode,
            ?access,
            "store opened"
        );
        Ok(Self { session })
    }

    /// Create an anonymous read-write store.
    pub fn create_temp() -> StorageResult<Self> {
        Self::open(None, OpenMode::Create, StorageAccess::ReadWriteExclusive)
    }

    /// The backing file, or `None` for an anonymous store.
    pub fn path(&self) -> Option<&Path> {
        self.session.path()
    }

    pub fn config(&self) -> &StorageConfig {
        self.session.config()
    }

    pub fn is_read_only(&self) -> bool {
        self.session.is_read_only()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// The root container.
    pub fn root(&self) -> StorageResult<Container> {
        self.session.ensure_open()?;
        Ok(Container::root(&self.session))
    }

    pub fn containers(&self) -> StorageResult<Containers> {
        Ok(self.root()?.containers())
    }

    pub fn objects(&self) -> StorageResult<Objects> {
        Ok(self.root()?.objects())
    }

    pub fn property_sets(&self) -> StorageResult<PropertySets> {
        Ok(self.root()?.property_sets())
    }

    pub fn summary_information(&self) -> StorageResult<SummaryInformation> {
        self.session.ensure_open()?;
        Ok(SummaryInformation::new(
            self.session.summary().cloned(),
            self.is_read_only(),
        ))
    }

    /// Write every pending change to the backing file.
    pub fn flush(&self) -> StorageResult<()> {
        self.session.flush()
    }

    /// Commit and release the store. Closing twice is a no-op.
    pub fn close(&self) -> StorageResult<()> {
        self.session.close()
    }
}

impl Drop for StructuredStorage {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            warn!(error = %e, "store close on drop failed");
        }
    }
}

impl fmt::Debug for StructuredStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredStorage")
            .field("session", &self.session)
            .finish()
    }
}

fn resolve_mode(path: Option<&Path>, mode: OpenMode) -> StorageResult<OpenMode> {
    match (path, mode) {
        (None, OpenMode::Open) => Err(StorageError::InvalidArgument(
            "opening an existing store requires a path".into(),
        )),
        (None, OpenMode::OpenOrCreate) => Ok(OpenMode::Create),
        (Some(path), OpenMode::OpenOrCreate) if !path.exists() => Ok(OpenMode::Create),
        (Some(_), OpenMode::OpenOrCreate) => Ok(OpenMode::Open),
        (_, mode) => Ok(mode),
    }
}

fn open_error(op: &'static str, path: &Path) -> impl FnOnce(StoreError) -> StorageError {
    let path: PathBuf = path.to_path_buf();
    move |e| match e {
        StoreError::NotFound(_) => StorageError::not_found(EntityKind::Storage, path.display()),
        StoreError::AlreadyExists(_) => {
            StorageError::already_exists(EntityKind::Storage, path.display())
        }
        other => StorageError::backend(op, path.display())(other),
    }
}
