//! Image file encoding.
//!
//! Layout:
//!
//! ```text
//! magic        4 bytes   "STOW"
//! version      u32 BE
//! sector size  u32 BE
//! payload len  u64 BE
//! payload      bincode-encoded StorageImage
//! crc32        u32 BE    CRC-32 of the payload
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stow_types::{Guid, PropertyValue};

use crate::error::{StoreError, StoreResult};
use crate::mode::FormatOptions;
use crate::node::{
    Element, Property, PropertySetNode, PropertySetState, StorageNode, StorageState, StreamNode,
    StreamState,
};

pub(crate) const MAGIC: &[u8; 4] = b"STOW";
pub(crate) const SUPPORTED_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const TRAILER_LEN: usize = 4;

#[derive(Serialize, Deserialize)]
struct StorageImage {
    state_bits: u32,
    elements: Vec<ElementImage>,
    property_sets: Vec<PropertySetImage>,
}

#[derive(Serialize, Deserialize)]
enum ElementImage {
    Storage { name: String, storage: StorageImage },
    Stream { name: String, data: Vec<u8> },
}

#[derive(Serialize, Deserialize)]
struct PropertySetImage {
    fmtid: Guid,
    next_id: u32,
    properties: Vec<PropertyImage>,
}

#[derive(Serialize, Deserialize)]
struct PropertyImage {
    id: u32,
    name: Option<String>,
    value: PropertyValue,
}

/// Serialize the tree under `root` into image bytes.
pub(crate) fn encode(root: &StorageNode, options: FormatOptions) -> StoreResult<Vec<u8>> {
    let image = snapshot_storage(root);
    let payload =
        bincode::serialize(&image).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&options.version.to_be_bytes());
    out.extend_from_slice(&options.sector_size.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    Ok(out)
}

/// Parse image bytes back into a tree.
pub(crate) fn decode(bytes: &[u8]) -> StoreResult<(Arc<StorageNode>, FormatOptions)> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(StoreError::CorruptImage("image too short".into()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(StoreError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(&bytes[0..4]).into(),
        });
    }
    let version = read_u32(bytes, 4)?;
    if version != SUPPORTED_VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }
    let sector_size = read_u32(bytes, 8)?;
    let payload_len = usize::try_from(read_u64(bytes, 12)?)
        .map_err(|_| StoreError::CorruptImage("payload length overflows".into()))?;

    let payload_end = HEADER_LEN
        .checked_add(payload_len)
        .filter(|end| end.checked_add(TRAILER_LEN) == Some(bytes.len()))
        .ok_or_else(|| {
            StoreError::CorruptImage(format!(
                "payload length {payload_len} does not match file size {}",
                bytes.len()
            ))
        })?;
    let payload = &bytes[HEADER_LEN..payload_end];
    let expected = read_u32(bytes, payload_end)?;
    let computed = crc32fast::hash(payload);
    if expected != computed {
        return Err(StoreError::ChecksumMismatch { expected, computed });
    }

    let image: StorageImage =
        bincode::deserialize(payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok((
        restore_storage(image),
        FormatOptions {
            version,
            sector_size,
        },
    ))
}

fn read_u32(bytes: &[u8], at: usize) -> StoreResult<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| StoreError::CorruptImage(format!("truncated at offset {at}")))
}

fn read_u64(bytes: &[u8], at: usize) -> StoreResult<u64> {
    bytes
        .get(at..at + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| StoreError::CorruptImage(format!("truncated at offset {at}")))
}

fn snapshot_storage(node: &StorageNode) -> StorageImage {
    let state = node.read();
    let elements = state
        .elements
        .iter()
        .map(|(name, element)| match element {
            Element::Storage(child) => ElementImage::Storage {
                name: name.clone(),
                storage: snapshot_storage(child),
            },
            Element::Stream(child) => ElementImage::Stream {
                name: name.clone(),
                data: child.read().data.clone(),
            },
        })
        .collect();
    let property_sets = state
        .property_sets
        .iter()
        .map(|(fmtid, set)| {
            let set = set.read();
            PropertySetImage {
                fmtid: *fmtid,
                next_id: set.next_id,
                properties: set
                    .properties
                    .iter()
                    .map(|(id, prop)| PropertyImage {
                        id: *id,
                        name: prop.name.clone(),
                        value: prop.value.clone(),
                    })
                    .collect(),
            }
        })
        .collect();
    StorageImage {
        state_bits: state.state_bits,
        elements,
        property_sets,
    }
}

fn restore_storage(image: StorageImage) -> Arc<StorageNode> {
    let elements = image
        .elements
        .into_iter()
        .map(|element| match element {
            ElementImage::Storage { name, storage } => {
                (name, Element::Storage(restore_storage(storage)))
            }
            ElementImage::Stream { name, data } => (
                name,
                Element::Stream(StreamNode::new(StreamState {
                    data,
                    ..Default::default()
                })),
            ),
        })
        .collect();
    let property_sets = image
        .property_sets
        .into_iter()
        .map(|set| {
            let properties: BTreeMap<u32, Property> = set
                .properties
                .into_iter()
                .map(|p| {
                    (
                        p.id,
                        Property {
                            name: p.name,
                            value: p.value,
                        },
                    )
                })
                .collect();
            let node: Arc<PropertySetNode> = PropertySetNode::new(PropertySetState {
                properties,
                next_id: set.next_id,
                removed: false,
            });
            (set.fmtid, node)
        })
        .collect();
    StorageNode::new(StorageState {
        elements,
        property_sets,
        state_bits: image.state_bits,
        removed: false,
    })
}
