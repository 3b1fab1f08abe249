//! Container engine for stow.
//!
//! A store is a tree of **containers**. Each container holds named
//! sub-containers, **objects** (binary blobs) and **property sets** (bags of
//! typed scalar values). Human names are case-insensitive and up to 255
//! characters; physically every child is stored under the storage-safe
//! encoding of a random GUID, and a per-container name mapper translates
//! between the two.
//!
//! # Quick Start
//!
//! ```rust
//! use stow_core::StructuredStorage;
//!
//! let store = StructuredStorage::create_temp().unwrap();
//! let docs = store.containers().unwrap().add("Docs").unwrap();
//! docs.objects().add("readme").unwrap().set_data(b"hello").unwrap();
//! docs.property_sets().add("meta").unwrap().set("title", "Readme").unwrap();
//!
//! let readme = store.containers().unwrap().get("docs").unwrap()
//!     .objects().get("README").unwrap();
//! assert_eq!(readme.data().unwrap(), b"hello");
//! store.close().unwrap();
//! ```
//!
//! # Handles
//!
//! Every open child is held once per store in a [`HandleCache`] keyed by
//! GUID. Wrappers share that handle; closing the store disposes all of them,
//! after which their operations fail with [`StorageError::Disposed`].

pub mod cache;
mod collection;
pub mod config;
pub mod container;
pub mod error;
mod handle;
pub mod mapper;
pub mod object;
pub mod object_stream;
pub mod property_set;
mod session;
pub mod storage;
pub mod summary;
pub mod traits;

pub use cache::HandleCache;
pub use collection::{ChildKind, Collection, Snapshot};
pub use config::StorageConfig;
pub use container::{Container, Containers, Objects, PropertySets, ROOT_CONTAINER_NAME};
pub use error::{EntityKind, ErrorKind, StorageError, StorageResult};
pub use mapper::NameMapper;
pub use object::{StorageObject, MAX_DATA_LEN};
pub use object_stream::{ObjectReader, ObjectWriter};
pub use property_set::PropertySet;
pub use storage::{OpenMode, StorageAccess, StructuredStorage};
pub use summary::{SummaryField, SummaryInformation, SummarySnapshot};
pub use traits::CachedHandle;
pub use stow_types::{Guid, PropertyValue, ValueKind};
