//! Hierarchical storage primitive for stow.
//!
//! A document is a tree of **storages** (directories) holding **streams**
//! (byte sequences) and **property sets** (typed scalar bags keyed by a
//! 128-bit format id). The whole tree lives in memory and is persisted to a
//! single image file.
//!
//! # Entry Points
//!
//! - [`create_document`] / [`open_document`]: root storage of a file
//! - [`create_temp_document`]: root storage of an anonymous document
//!
//! # Handles
//!
//! - [`Storage`]: create/open/destroy/enumerate children, manage property sets
//! - [`Stream`]: `Read + Write + Seek`, clone, set length, byte-range locks
//! - [`PropertyStorage`]: read/write/delete/rename/enumerate properties
//!
//! # Design Rules
//!
//! 1. Every element is opened exclusively; a second open fails with
//!    [`StoreError::AccessDenied`].
//! 2. Direct mode: changes are visible immediately; committing or releasing
//!    the root storage writes the image file.
//! 3. Destroying an element reverts any handle still open on it.
//! 4. Image files are written to a temporary sibling and renamed into place.
//! 5. Sharing between documents is enforced per process by path.

pub mod document;
pub mod error;
mod image;
pub mod mode;
mod node;
pub mod propset;
pub mod storage;
pub mod stream;

pub use document::{create_document, create_temp_document, open_document};
pub use error::{StoreError, StoreResult};
pub use mode::{flags, AccessMode, Disposition, FormatOptions, StorageAccess};
pub use propset::{PropSpec, PropertySetStat, PropertyStat, PropertyStorage};
pub use storage::{validate_element_name, ElementKind, StatInfo, Storage, MAX_ELEMENT_NAME_LEN};
pub use stream::{Stream, MAX_STREAM_LEN};
