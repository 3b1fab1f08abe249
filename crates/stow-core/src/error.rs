use std::fmt;

use stow_store::StoreError;
use stow_types::TypeError;

/// The kind of entity an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Storage,
    Container,
    Object,
    PropertySet,
    Property,
    Mapping,
    CachedHandle,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Storage => "storage",
            EntityKind::Container => "container",
            EntityKind::Object => "object",
            EntityKind::PropertySet => "property set",
            EntityKind::Property => "property",
            EntityKind::Mapping => "name mapping",
            EntityKind::CachedHandle => "cached handle",
        };
        f.write_str(s)
    }
}

/// Coarse classification of a [`StorageError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    ReadOnly,
    Disposed,
    InvalidArgument,
    Backend,
    Capacity,
}

/// Errors from container engine operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A name, GUID, mapping or property was absent where presence was required.
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    /// Name collision on add or rename.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: EntityKind, name: String },

    /// Mutation attempted on a read-only node.
    #[error("{0} is read-only")]
    ReadOnly(EntityKind),

    /// The entity, or the storage owning it, has been closed.
    #[error("{0} has been disposed")]
    Disposed(EntityKind),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The value's type is outside the set a property may hold.
    #[error("property {name:?} cannot hold a value of type {kind}")]
    InvalidDataType { name: String, kind: String },

    #[error("index {index} is out of range for {count} entries")]
    IndexOutOfRange { index: usize, count: usize },

    /// Content exceeds the whole-buffer access limit.
    #[error("object is too large for whole-buffer access: {len} bytes (limit {limit})")]
    TooLarge { len: u64, limit: u64 },

    /// Failure surfaced from the storage primitive.
    #[error("{op} failed for {name}: {source}")]
    Backend {
        op: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for container engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StorageError::ReadOnly(_) => ErrorKind::ReadOnly,
            StorageError::Disposed(_) => ErrorKind::Disposed,
            StorageError::InvalidArgument(_)
            | StorageError::InvalidDataType { .. }
            | StorageError::IndexOutOfRange { .. }
            | StorageError::Type(_) => ErrorKind::InvalidArgument,
            StorageError::TooLarge { .. } => ErrorKind::Capacity,
            StorageError::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Returns `true` if the primitive refused an open because the node is
    /// held by another handle.
    pub fn is_sharing_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Backend {
                source: StoreError::AccessDenied(_),
                ..
            }
        )
    }

    /// Report a name-mapping miss or collision against the entity the
    /// mapping names.
    pub(crate) fn for_entity(self, kind: EntityKind) -> Self {
        match self {
            StorageError::NotFound {
                kind: EntityKind::Mapping,
                name,
            } => StorageError::NotFound { kind, name },
            StorageError::AlreadyExists {
                kind: EntityKind::Mapping,
                name,
            } => StorageError::AlreadyExists { kind, name },
            other => other,
        }
    }

    pub(crate) fn not_found(kind: EntityKind, name: impl fmt::Display) -> Self {
        StorageError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: EntityKind, name: impl fmt::Display) -> Self {
        StorageError::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }

    /// Wrap a primitive failure with the operation and the offending name.
    pub(crate) fn backend(op: &'static str, name: impl fmt::Display) -> impl FnOnce(StoreError) -> Self {
        let name = name.to_string();
        move |source| StorageError::from_store(op, name, source)
    }

    /// A reverted node means its element, or an ancestor, was destroyed
    /// through another wrapper. That is reported as disposed access, labelled
    /// with the entity by [`StorageError::disposed_as`].
    fn from_store(op: &'static str, name: String, source: StoreError) -> Self {
        if is_reverted(&source) {
            return StorageError::Disposed(EntityKind::CachedHandle);
        }
        StorageError::Backend { op, name, source }
    }

    /// Label a disposed-handle error with the entity that owns the handle.
    pub(crate) fn disposed_as(self, kind: EntityKind) -> Self {
        match self {
            StorageError::Disposed(EntityKind::CachedHandle) => StorageError::Disposed(kind),
            other => other,
        }
    }

    /// Like [`StorageError::backend`], but a missing element becomes
    /// [`StorageError::NotFound`].
    pub(crate) fn on_open(
        op: &'static str,
        kind: EntityKind,
        name: impl fmt::Display,
    ) -> impl FnOnce(StoreError) -> Self {
        let name = name.to_string();
        move |source| match source {
            StoreError::NotFound(_) => StorageError::NotFound { kind, name },
            source => StorageError::from_store(op, name, source),
        }
    }

    /// Wrap an I/O failure of a stream operation.
    pub(crate) fn stream_io(op: &'static str, name: impl fmt::Display) -> impl FnOnce(std::io::Error) -> Self {
        let name = name.to_string();
        move |e| StorageError::from_store(op, name, StoreError::Io(e))
    }
}

fn is_reverted(err: &StoreError) -> bool {
    match err {
        StoreError::Reverted => true,
        StoreError::Io(e) => e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<StoreError>())
            .is_some_and(is_reverted),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            StorageError::not_found(EntityKind::Object, "x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StorageError::ReadOnly(EntityKind::Container).kind(),
            ErrorKind::ReadOnly
        );
        assert_eq!(
            StorageError::TooLarge { len: 1, limit: 0 }.kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            StorageError::from(TypeError::InvalidGuid("x".into())).kind(),
            ErrorKind::InvalidArgument
        );
        let backend = StorageError::backend("commit", "root")(StoreError::ReadOnly);
        assert_eq!(backend.kind(), ErrorKind::Backend);
    }

    #[test]
    fn open_failures_map_missing_to_not_found() {
        let err = StorageError::on_open("open container", EntityKind::Container, "g")(
            StoreError::NotFound("g".into()),
        );
        assert!(matches!(
            err,
            StorageError::NotFound {
                kind: EntityKind::Container,
                ..
            }
        ));
        let err = StorageError::on_open("open container", EntityKind::Container, "g")(
            StoreError::AccessDenied("busy".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.is_sharing_violation());
        assert!(!StorageError::Disposed(EntityKind::Object).is_sharing_violation());
    }

    #[test]
    fn reverted_nodes_read_as_disposed() {
        let err = StorageError::backend("read object", "g")(StoreError::Reverted)
            .disposed_as(EntityKind::Object);
        assert!(matches!(err, StorageError::Disposed(EntityKind::Object)));

        let io = std::io::Error::from(StoreError::Reverted);
        let err = StorageError::stream_io("seek", "g")(io);
        assert_eq!(err.kind(), ErrorKind::Disposed);

        let err = StorageError::Disposed(EntityKind::Storage).disposed_as(EntityKind::Object);
        assert!(matches!(err, StorageError::Disposed(EntityKind::Storage)));
    }

    #[test]
    fn mapping_errors_take_the_entity_kind() {
        let err = StorageError::already_exists(EntityKind::Mapping, "docs")
            .for_entity(EntityKind::Container);
        assert_eq!(err.to_string(), "container already exists: docs");
        let err = StorageError::ReadOnly(EntityKind::Mapping).for_entity(EntityKind::Object);
        assert!(matches!(err, StorageError::ReadOnly(EntityKind::Mapping)));
    }

    #[test]
    fn messages_name_the_entity() {
        let err = StorageError::already_exists(EntityKind::PropertySet, "meta");
        assert_eq!(err.to_string(), "property set already exists: meta");
    }
}
