//! Prefix validation and the anchored rename token.
//!
//! Keys look like `<prefix>-<local-id>`. Every match and substitution works
//! on the literal token `"<prefix>-"`, never on a bare prefix, so `dirt-1`
//! is renamed while `dirty-1` is not.

use crate::{Error, Result};
use serde::Serialize;

/// Separator between the prefix and the local id.
pub const SEPARATOR: char = '-';

/// Validate one prefix.
///
/// A prefix starts with a lowercase ASCII letter, contains only lowercase
/// letters, digits and hyphens, and does not end with a hyphen.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let mut chars = prefix.chars();
    match chars.next() {
        None => return Err(Error::Validation("prefix must not be empty".to_string())),
        Some(c) if !c.is_ascii_lowercase() => {
            return Err(Error::Validation(format!(
                "prefix must start with a lowercase letter, got: {}",
                prefix
            )));
        }
        Some(_) => {}
    }

    if let Some(bad) = prefix
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == SEPARATOR))
    {
        return Err(Error::Validation(format!(
            "prefix may only contain lowercase letters, digits and '-', found '{}' in: {}",
            bad, prefix
        )));
    }

    if prefix.ends_with(SEPARATOR) {
        return Err(Error::Validation(format!(
            "prefix must not end with '{}': {}",
            SEPARATOR, prefix
        )));
    }

    Ok(())
}

/// A validated `from -> to` prefix rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixRename {
    from: String,
    to: String,
}

impl PrefixRename {
    /// Validate both prefixes and their relationship.
    pub fn new(from: &str, to: &str) -> Result<Self> {
        validate_prefix(from)?;
        validate_prefix(to)?;

        if from == to {
            return Err(Error::Validation(format!(
                "--from and --to are the same prefix: {}",
                from
            )));
        }

        let rename = Self {
            from: from.to_string(),
            to: to.to_string(),
        };

        // If one token starts with the other, renamed keys would still match
        // the old token (or pre-existing keys would match the new one).
        let (from_token, to_token) = (rename.from_token(), rename.to_token());
        if to_token.starts_with(&from_token) || from_token.starts_with(&to_token) {
            return Err(Error::Validation(format!(
                "prefixes '{}' and '{}' overlap: keys under one would also match the other",
                from, to
            )));
        }

        Ok(rename)
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    /// `"<from>-"`
    pub fn from_token(&self) -> String {
        format!("{}{}", self.from, SEPARATOR)
    }

    /// `"<to>-"`
    pub fn to_token(&self) -> String {
        format!("{}{}", self.to, SEPARATOR)
    }

    /// Rename one key, or `None` if it does not carry the `from` token.
    pub fn rename_key(&self, key: &str) -> Option<String> {
        key.strip_prefix(&self.from_token())
            .map(|local| format!("{}{}", self.to_token(), local))
    }
}

impl std::fmt::Display for PrefixRename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix_valid() {
        for prefix in ["dirt", "chimaro", "bd", "a1", "my-app", "x"] {
            assert!(validate_prefix(prefix).is_ok(), "{prefix}");
        }
    }

    #[test]
    fn test_validate_prefix_invalid() {
        for prefix in ["", "Dirt", "1abc", "-x", "dirt-", "di_rt", "dirt.x", "dirt x", "dïrt"] {
            assert!(validate_prefix(prefix).is_err(), "{prefix:?}");
        }
    }

    #[test]
    fn test_rename_rejects_same_prefix() {
        assert!(PrefixRename::new("dirt", "dirt").is_err());
    }

    #[test]
    fn test_rename_rejects_overlapping_tokens() {
        assert!(PrefixRename::new("dirt", "dirt-x").is_err());
        assert!(PrefixRename::new("dirt-x", "dirt").is_err());
        // "dirty-" does not start with "dirt-"
        assert!(PrefixRename::new("dirt", "dirty").is_ok());
    }

    #[test]
    fn test_rename_key_is_anchored() {
        let rename = PrefixRename::new("dirt", "chimaro").unwrap();
        assert_eq!(rename.rename_key("dirt-123"), Some("chimaro-123".to_string()));
        assert_eq!(rename.rename_key("dirt-1.2"), Some("chimaro-1.2".to_string()));
        assert_eq!(rename.rename_key("dirty-1"), None);
        assert_eq!(rename.rename_key("xdirt-1"), None);
        assert_eq!(rename.rename_key("DIRT-1"), None);
    }

    #[test]
    fn test_tokens_and_display() {
        let rename = PrefixRename::new("dirt", "chimaro").unwrap();
        assert_eq!(rename.from_token(), "dirt-");
        assert_eq!(rename.to_token(), "chimaro-");
        assert_eq!(rename.to_string(), "dirt -> chimaro");
    }
}
