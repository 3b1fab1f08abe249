//! Well-known property-set format ids and property id bases.

use crate::guid::Guid;

/// Hidden property set mapping sub-container names to GUIDs.
pub const CONTAINER_NAME_MAPPER: Guid = Guid::from_u128(0x3D43F9C4_AB22_4B71_80E0_333EBF5EAA14);

/// Hidden property set mapping object names to GUIDs.
pub const OBJECT_NAME_MAPPER: Guid = Guid::from_u128(0xCAC7F8BA_50EB_4910_ACA7_27DA77718924);

/// Hidden property set mapping property-set names to format ids.
pub const PROPERTY_SET_NAME_MAPPER: Guid =
    Guid::from_u128(0x10A46423_6C68_4536_9461_5F16A79D947A);

/// The document summary-information property set.
pub const SUMMARY_INFORMATION: Guid = Guid::from_u128(0xF29F85E0_4FF9_1068_AB91_08002B27B3D9);

/// First property id handed out to name-mapping entries.
pub const NAME_MAPPER_BASE_ID: u32 = 255;

/// First property id handed out to user properties.
pub const PROPERTY_SET_BASE_ID: u32 = 255;

/// Returns `true` for format ids reserved by the engine itself.
pub fn is_reserved(fmtid: &Guid) -> bool {
    [
        CONTAINER_NAME_MAPPER,
        OBJECT_NAME_MAPPER,
        PROPERTY_SET_NAME_MAPPER,
        SUMMARY_INFORMATION,
    ]
    .contains(fmtid)
}

/// Property ids of the summary-information set.
pub mod pid {
    pub const TITLE: u32 = 2;
    pub const SUBJECT: u32 = 3;
    pub const AUTHOR: u32 = 4;
    pub const KEYWORDS: u32 = 5;
    pub const COMMENTS: u32 = 6;
    pub const TEMPLATE: u32 = 7;
    pub const LAST_AUTHOR: u32 = 8;
    pub const REVISION_NUMBER: u32 = 9;
    pub const EDIT_TIME: u32 = 10;
    pub const LAST_PRINTED: u32 = 11;
    pub const CREATED: u32 = 12;
    pub const LAST_SAVED: u32 = 13;
    pub const PAGE_COUNT: u32 = 14;
    pub const WORD_COUNT: u32 = 15;
    pub const CHAR_COUNT: u32 = 16;
    pub const APP_NAME: u32 = 18;
    pub const SECURITY: u32 = 19;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapper_ids_are_distinct_and_reserved() {
        let ids = [
            CONTAINER_NAME_MAPPER,
            OBJECT_NAME_MAPPER,
            PROPERTY_SET_NAME_MAPPER,
            SUMMARY_INFORMATION,
        ];
        for (i, a) in ids.iter().enumerate() {
            assert!(is_reserved(a));
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(!is_reserved(&Guid::new_v4()));
    }

    #[test]
    fn summary_id_matches_well_known_text() {
        assert_eq!(
            SUMMARY_INFORMATION.to_string(),
            "{F29F85E0-4FF9-1068-AB91-08002B27B3D9}"
        );
    }
}
