//! Human-readable name rules.
//!
//! Valid names:
//! - Must be non-empty
//! - Must not contain control characters (including NUL)
//! - Must not exceed the configured maximum length in characters
//!
//! Names compare case-insensitively everywhere: two names that differ only
//! in case refer to the same entry.

use crate::error::TypeError;

/// Default maximum name length in characters.
pub const DEFAULT_MAX_NAME_LEN: usize = 255;

/// Validate a human-readable name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use stow_types::names::validate_name;
///
/// assert!(validate_name("Docs", 255).is_ok());
/// assert!(validate_name("release notes.txt", 255).is_ok());
/// assert!(validate_name("", 255).is_err());
/// assert!(validate_name("bad\0name", 255).is_err());
/// ```
pub fn validate_name(name: &str, max_len: usize) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".into(),
        });
    }

    if let Some(ch) = name.chars().find(|c| c.is_control()) {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: format!("contains control character: {ch:?}"),
        });
    }

    let len = name.chars().count();
    if len > max_len {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: format!("{len} characters exceeds the limit of {max_len}"),
        });
    }

    Ok(())
}

/// Case-insensitive name equality.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || fold_case(a) == fold_case(b)
}

/// The case-folded key for a name.
pub fn fold_case(name: &str) -> String {
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_name("a", 255).is_ok());
        assert!(validate_name("Docs", 255).is_ok());
        assert!(validate_name("with space", 255).is_ok());
        assert!(validate_name("Ünïcödé", 255).is_ok());
        assert!(validate_name(&"x".repeat(255), 255).is_ok());
    }

    #[test]
    fn empty_is_invalid() {
        assert!(validate_name("", 255).is_err());
    }

    #[test]
    fn control_characters_are_invalid() {
        assert!(validate_name("tab\there", 255).is_err());
        assert!(validate_name("nul\0", 255).is_err());
        assert!(validate_name("line\nbreak", 255).is_err());
    }

    #[test]
    fn too_long_is_invalid() {
        let err = validate_name(&"x".repeat(256), 255).unwrap_err();
        assert!(matches!(err, TypeError::InvalidName { .. }));
    }

    #[test]
    fn case_insensitive_compare() {
        assert!(eq_ignore_case("Readme", "README"));
        assert!(eq_ignore_case("straße", "STRAßE"));
        assert!(!eq_ignore_case("readme", "readme2"));
    }
}
