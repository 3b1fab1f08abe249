//! Access, sharing and creation modes.

use serde::{Deserialize, Serialize};

/// Mode flag bits, as reported by [`crate::StatInfo::mode_flags`].
pub mod flags {
    pub const READ: u32 = 0x0000_0000;
    pub const WRITE: u32 = 0x0000_0001;
    pub const READ_WRITE: u32 = 0x0000_0002;
    pub const SHARE_DENY_NONE: u32 = 0x0000_0040;
    pub const SHARE_DENY_WRITE: u32 = 0x0000_0020;
    pub const SHARE_EXCLUSIVE: u32 = 0x0000_0010;
    pub const DIRECT: u32 = 0x0000_0000;
    pub const DELETE_ON_RELEASE: u32 = 0x0400_0000;
    /// Mask selecting the access bits.
    pub const ACCESS_MASK: u32 = 0x0000_000F;
}

/// Per-handle access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }

    pub fn flags(&self) -> u32 {
        match self {
            AccessMode::Read => flags::READ,
            AccessMode::ReadWrite => flags::READ_WRITE,
        }
    }
}

/// Access requested when opening a whole document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageAccess {
    /// Read and write; no other opener is allowed.
    ReadWriteExclusive,
    /// Read only; no other opener is allowed.
    ReadOnlyExclusive,
    /// Read only; other read-only shared openers are allowed, writers are
    /// denied.
    ReadOnlyShared,
}

impl StorageAccess {
    pub fn access_mode(&self) -> AccessMode {
        match self {
            StorageAccess::ReadWriteExclusive => AccessMode::ReadWrite,
            StorageAccess::ReadOnlyExclusive | StorageAccess::ReadOnlyShared => AccessMode::Read,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        !matches!(self, StorageAccess::ReadOnlyShared)
    }

    pub fn flags(&self) -> u32 {
        let share = if self.is_exclusive() {
            flags::SHARE_EXCLUSIVE
        } else {
            flags::SHARE_DENY_WRITE
        };
        self.access_mode().flags() | share | flags::DIRECT
    }
}

/// What to do when creating a document whose file may already exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    /// Create, replacing any existing file.
    Create,
    /// Create, failing if the file exists.
    CreateNew,
    /// Open an existing file, failing if it is absent.
    OpenExisting,
}

/// Fixed format options recorded in the image header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    pub version: u32,
    pub sector_size: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            version: 1,
            sector_size: 4096,
        }
    }
}
