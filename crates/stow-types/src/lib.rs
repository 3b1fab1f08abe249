//! Foundation types for stow.
//!
//! This crate provides the identity and value types shared by the storage
//! primitive (`stow-store`) and the container engine (`stow-core`).
//!
//! # Key Types
//!
//! - [`Guid`]: 128-bit node identity, with the storage-safe name codec
//! - [`PropertyValue`]: the closed set of scalar values a property can hold
//! - [`Decimal`]: 96-bit fixed-point decimal
//! - [`fmtid`]: well-known property-set format ids
//! - [`names`]: human-readable name validation and case folding

pub mod error;
pub mod fmtid;
pub mod guid;
pub mod names;
pub mod value;

pub use error::TypeError;
pub use guid::Guid;
pub use value::{Decimal, PropertyValue, ValueKind};
