/// Errors from storage primitive operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No element, property set or property with this name exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// An element or property set with this name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The element is already open, or the requested access conflicts with
    /// the current sharing state.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The handle refers to an element that was destroyed, or to a document
    /// that was closed.
    #[error("handle reverted: the underlying element no longer exists")]
    Reverted,

    /// A stream would grow beyond the largest length the store supports.
    #[error("stream length {len} exceeds the limit of {limit} bytes")]
    TooLarge { len: u64, limit: u64 },

    /// Write attempted through a read-only handle.
    #[error("handle is read-only")]
    ReadOnly,

    /// The element name is not acceptable to the store.
    #[error("invalid element name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The byte range is locked by another handle, or the unlock did not
    /// match a held lock.
    #[error("lock violation at offset {offset} (length {len})")]
    LockViolation { offset: u64, len: u64 },

    /// The image file does not start with the expected magic bytes.
    #[error("invalid magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    /// The image file was written by an unsupported format version.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// The image payload checksum does not match.
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// The image file is truncated or otherwise malformed.
    #[error("corrupt image: {0}")]
    CorruptImage(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for storage primitive operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for std::io::Error {
    fn from(err: StoreError) -> Self {
        use std::io::ErrorKind;
        match err {
            StoreError::Io(e) => e,
            StoreError::ReadOnly | StoreError::AccessDenied(_) => {
                std::io::Error::new(ErrorKind::PermissionDenied, err)
            }
            StoreError::NotFound(_) => std::io::Error::new(ErrorKind::NotFound, err),
            StoreError::TooLarge { .. } => std::io::Error::new(ErrorKind::InvalidInput, err),
            other => std::io::Error::other(other),
        }
    }
}
