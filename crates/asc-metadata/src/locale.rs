//! Locale normalization.
//!
//! Every locale used as a matching key goes through [`normalize_locale`]
//! first, so `en_US`, `en-us` and `EN-US` all meet as `en-US`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{MigrateError, Result};

fn locale_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]+)*$").expect("valid locale pattern"))
}

fn title_case(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Normalize a locale code to canonical form.
///
/// Underscores become hyphens. The first segment is lower-cased; after that
/// 2-3 character segments are upper-cased (region), 4 character segments are
/// title-cased (script) and anything longer is lower-cased (variant).
///
/// # Example
///
/// ```rust
/// use asc_metadata::locale::normalize_locale;
///
/// assert_eq!(normalize_locale("en_us").unwrap(), "en-US");
/// assert_eq!(normalize_locale("zh_hans").unwrap(), "zh-Hans");
/// assert_eq!(normalize_locale("ES-419").unwrap(), "es-419");
/// assert!(normalize_locale("e").is_err());
/// ```
pub fn normalize_locale(input: &str) -> Result<String> {
    let replaced = input.trim().replace('_', "-");

    let normalized = replaced
        .split('-')
        .enumerate()
        .map(|(i, segment)| {
            if i == 0 {
                return segment.to_lowercase();
            }
            match segment.chars().count() {
                2 | 3 => segment.to_uppercase(),
                4 => title_case(segment),
                _ => segment.to_lowercase(),
            }
        })
        .collect::<Vec<_>>()
        .join("-");

    if !locale_pattern().is_match(&normalized) {
        return Err(MigrateError::InvalidLocale {
            input: input.to_string(),
        });
    }
    Ok(normalized)
}

/// Check if two locale codes are equivalent.
///
/// Invalid codes are never equivalent to anything.
///
/// ```rust
/// use asc_metadata::locale::locales_equivalent;
///
/// assert!(locales_equivalent("en-US", "en_us"));
/// assert!(!locales_equivalent("en-US", "en-GB"));
/// ```
pub fn locales_equivalent(a: &str, b: &str) -> bool {
    match (normalize_locale(a), normalize_locale(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// A normalized locale tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locale(String);

impl Locale {
    /// Parses and normalizes a locale code.
    pub fn parse(input: &str) -> Result<Self> {
        normalize_locale(input).map(Locale)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The language subtag, e.g. `en` for `en-US`.
    pub fn language(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Locale {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Locale {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_variants_converge() {
        for input in ["en_US", "en-us", "EN-US", "en_us", " en-US "] {
            assert_eq!(normalize_locale(input).unwrap(), "en-US", "input {input:?}");
        }
    }

    #[test]
    fn test_script_and_variant_segments() {
        assert_eq!(normalize_locale("zh_hans").unwrap(), "zh-Hans");
        assert_eq!(normalize_locale("ZH-HANT").unwrap(), "zh-Hant");
        assert_eq!(normalize_locale("sr-latn-rs").unwrap(), "sr-Latn-RS");
        assert_eq!(normalize_locale("de-DE-1996").unwrap(), "de-DE-1996");
        assert_eq!(normalize_locale("sl-ROZAJ").unwrap(), "sl-rozaj");
        assert_eq!(normalize_locale("ja").unwrap(), "ja");
    }

    #[test]
    fn test_invalid_shapes() {
        for input in ["", "e", "english", "en--US", "en-", "12-US", "en US"] {
            let err = normalize_locale(input).unwrap_err();
            match err {
                MigrateError::InvalidLocale { input: reported } => assert_eq!(reported, input),
                other => panic!("unexpected error for {input:?}: {other}"),
            }
        }
    }

    #[test]
    fn test_locale_type() {
        let locale = Locale::parse("pt_br").unwrap();
        assert_eq!(locale.as_str(), "pt-BR");
        assert_eq!(locale.language(), "pt");
        assert_eq!(serde_json::to_string(&locale).unwrap(), "\"pt-BR\"");
        assert!(locales_equivalent("pt-BR", "PT_br"));
        assert!(!locales_equivalent("x", "x"));
    }
}
