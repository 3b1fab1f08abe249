use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Length in characters of a storage-safe node name.
pub const STORAGE_NAME_LEN: usize = 24;

/// A 128-bit identifier.
///
/// GUIDs name every physical child node: sub-containers and objects live
/// under the storage-safe Base64 form of their GUID (see
/// [`Guid::to_storage_name`]), property sets use the GUID directly as their
/// format id. Comparison is byte-exact over all 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Guid([u8; 16]);

impl Guid {
    /// Generate a fresh random GUID.
    pub fn new_v4() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// The nil GUID (all zeros). Identifies the root container.
    pub const fn nil() -> Self {
        Self([0u8; 16])
    }

    /// Build a GUID from its 128-bit big-endian value.
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// Build a GUID from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns `true` for the nil GUID.
    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse the usual textual forms (hyphenated, simple, braced).
    pub fn parse_str(s: &str) -> Result<Self, TypeError> {
        Uuid::parse_str(s)
            .map(|u| Self(*u.as_bytes()))
            .map_err(|e| TypeError::InvalidGuid(format!("{s}: {e}")))
    }

    /// Build a GUID from a byte slice, which must be exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: 16,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Encode as a storage-safe node name.
    ///
    /// Standard padded Base64 of the 16 bytes with `/` replaced by `_`, so
    /// the result never contains a path separator.
    ///
    /// ```
    /// use stow_types::Guid;
    ///
    /// let id = Guid::new_v4();
    /// let name = id.to_storage_name();
    /// assert_eq!(name.len(), 24);
    /// assert!(!name.contains('/'));
    /// assert_eq!(Guid::from_storage_name(&name), Some(id));
    /// ```
    pub fn to_storage_name(&self) -> String {
        STANDARD.encode(self.0).replace('/', "_")
    }

    /// Decode a node name produced by [`Guid::to_storage_name`].
    ///
    /// Returns `None` for anything that is not such an encoding: nodes that
    /// were not created through GUID naming are ignored by callers.
    pub fn from_storage_name(name: &str) -> Option<Self> {
        if name.len() != STORAGE_NAME_LEN {
            return None;
        }
        let bytes = STANDARD.decode(name.replace('_', "/")).ok()?;
        Self::from_slice(&bytes).ok()
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.short_hex())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:X}}}", Uuid::from_bytes(self.0).hyphenated())
    }
}

impl FromStr for Guid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl From<[u8; 16]> for Guid {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Self(*uuid.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_guids_are_distinct() {
        let a = Guid::new_v4();
        let b = Guid::new_v4();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn nil_is_all_zeros() {
        assert!(Guid::nil().is_nil());
        assert_eq!(Guid::default(), Guid::nil());
    }

    #[test]
    fn display_is_braced_uppercase() {
        let id = Guid::from_u128(0x3D43F9C4_AB22_4B71_80E0_333EBF5EAA14);
        assert_eq!(id.to_string(), "{3D43F9C4-AB22-4B71-80E0-333EBF5EAA14}");
        assert_eq!(id.to_string().parse::<Guid>().unwrap(), id);
    }

    #[test]
    fn parse_accepts_lowercase_and_rejects_garbage() {
        let id = Guid::parse_str("cac7f8ba-50eb-4910-aca7-27da77718924").unwrap();
        assert_eq!(id, Guid::from_u128(0xCAC7F8BA_50EB_4910_ACA7_27DA77718924));
        assert!(Guid::parse_str("not-a-guid").is_err());
    }

    #[test]
    fn storage_name_replaces_slash() {
        // 0xFF bytes encode to '/' characters in standard Base64.
        let id = Guid::from_bytes([0xFF; 16]);
        let name = id.to_storage_name();
        assert!(name.contains('_'));
        assert!(!name.contains('/'));
        assert_eq!(Guid::from_storage_name(&name), Some(id));
    }

    #[test]
    fn foreign_names_do_not_decode() {
        assert_eq!(Guid::from_storage_name("readme.txt"), None);
        assert_eq!(Guid::from_storage_name(""), None);
        // Right length, wrong alphabet.
        assert_eq!(Guid::from_storage_name("!!!!!!!!!!!!!!!!!!!!!!!!"), None);
        // Valid Base64 of the wrong byte count.
        assert_eq!(Guid::from_storage_name("AAAAAAAAAAAAAAAAAAAAAAAA"), None);
    }

    #[test]
    fn from_slice_checks_length() {
        assert_eq!(
            Guid::from_slice(&[1, 2, 3]),
            Err(TypeError::InvalidLength {
                expected: 16,
                actual: 3
            })
        );
    }

    proptest! {
        #[test]
        fn storage_name_roundtrips(bytes in proptest::array::uniform16(any::<u8>())) {
            let id = Guid::from_bytes(bytes);
            let name = id.to_storage_name();
            prop_assert_eq!(name.len(), STORAGE_NAME_LEN);
            prop_assert!(!name.contains('/'));
            prop_assert_eq!(Guid::from_storage_name(&name), Some(id));
        }
    }
}
