//! Deliverfile parsing
//!
//! Only the directives that matter for migration are read; everything else
//! in the file is ignored so newer fastlane options do not break parsing.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Settings read from a Deliverfile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliverfileConfig {
    /// Location of the Deliverfile itself
    pub path: PathBuf,
    pub metadata_path: Option<String>,
    pub screenshots_path: Option<String>,
    pub app_identifier: Option<String>,
    pub app_version: Option<String>,
    pub platform: Option<String>,
    pub skip_metadata: Option<bool>,
    pub skip_screenshots: Option<bool>,
}

impl DeliverfileConfig {
    /// Directory relative paths in the file are resolved against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Resolves a declared path against the Deliverfile's directory.
    pub fn resolve(&self, declared: &str) -> PathBuf {
        let declared = Path::new(declared);
        if declared.is_absolute() {
            declared.to_path_buf()
        } else {
            self.base_dir().join(declared)
        }
    }

    pub fn metadata_dir(&self) -> Option<PathBuf> {
        self.metadata_path.as_deref().map(|p| self.resolve(p))
    }

    pub fn screenshots_dir(&self) -> Option<PathBuf> {
        self.screenshots_path.as_deref().map(|p| self.resolve(p))
    }

    /// The `platform` value in App Store Connect's spelling. Unknown values
    /// give `None`.
    pub fn api_platform(&self) -> Option<&'static str> {
        match self.platform.as_deref()?.to_ascii_lowercase().as_str() {
            "ios" => Some("IOS"),
            "osx" | "macos" => Some("MAC_OS"),
            "appletvos" | "tvos" => Some("TV_OS"),
            "xros" | "visionos" => Some("VISION_OS"),
            _ => None,
        }
    }
}

/// Load and parse a Deliverfile
pub fn parse_deliverfile(path: &Path) -> Result<DeliverfileConfig> {
    let content =
        std::fs::read_to_string(path).map_err(|e| MigrateError::read(path, e.to_string()))?;
    parse_deliverfile_str(&content, path)
}

/// Parse Deliverfile content. `path` is recorded for error messages and
/// relative path resolution.
pub fn parse_deliverfile_str(content: &str, path: &Path) -> Result<DeliverfileConfig> {
    let mut config = DeliverfileConfig {
        path: path.to_path_buf(),
        ..Default::default()
    };

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        let key_len = line
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(line.len());
        let key = &line[..key_len];

        let slot: &mut Option<String> = match key {
            "metadata_path" => &mut config.metadata_path,
            "screenshots_path" => &mut config.screenshots_path,
            "app_identifier" => &mut config.app_identifier,
            "app_version" => &mut config.app_version,
            "platform" => &mut config.platform,
            "skip_metadata" | "skip_screenshots" => {
                let value = parse_value(&line[key_len..], key, path, line_no)?;
                let flag = parse_bool(&value, key, path, line_no)?;
                if key == "skip_metadata" {
                    config.skip_metadata = Some(flag);
                } else {
                    config.skip_screenshots = Some(flag);
                }
                continue;
            }
            _ => {
                debug!(key, line = line_no, "ignoring unrecognized Deliverfile key");
                continue;
            }
        };

        *slot = Some(parse_value(&line[key_len..], key, path, line_no)?);
    }

    Ok(config)
}

/// Cuts the line at the first `#` outside a quoted span.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => escaped = true,
            ('#', None) => return &line[..i],
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            _ => {}
        }
    }
    line
}

fn parse_error(path: &Path, line: usize, message: String) -> MigrateError {
    MigrateError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    }
}

/// Extracts the value after a key: optional `=`, optional parentheses, then
/// a quoted string or a single bare token.
fn parse_value(rest: &str, key: &str, path: &Path, line: usize) -> Result<String> {
    let mut rest = rest.trim();
    if let Some(stripped) = rest.strip_prefix('=') {
        rest = stripped.trim();
    }
    if let Some(stripped) = rest.strip_prefix('(') {
        rest = stripped.trim();
        if let Some(stripped) = rest.strip_suffix(')') {
            rest = stripped.trim();
        }
    }

    let value = match rest.chars().next() {
        Some(q @ ('"' | '\'')) => read_quoted(&rest[1..], q).ok_or_else(|| {
            parse_error(path, line, format!("unterminated string for key `{}`", key))
        })?,
        Some(_) => rest
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    };

    if value.is_empty() {
        return Err(parse_error(path, line, format!("empty value for key `{}`", key)));
    }
    Ok(value)
}

/// Reads up to the matching unescaped `quote`. `\\` and `\<quote>` are
/// unescaped; other backslashes are kept.
fn read_quoted(s: &str, quote: char) -> Option<String> {
    let mut out = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) if next == '\\' || next == quote => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => return None,
            },
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
    None
}

fn parse_bool(value: &str, key: &str, path: &Path, line: usize) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(parse_error(
            path,
            line,
            format!("invalid boolean {:?} for key `{}`", value, key),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(content: &str) -> Result<DeliverfileConfig> {
        parse_deliverfile_str(content, Path::new("/project/fastlane/Deliverfile"))
    }

    #[test]
    fn test_parse_common_forms() {
        let config = parse(
            r#"
# Deliverfile generated by fastlane

metadata_path "./metadata"
screenshots_path('./screenshots')   # inline comment
skip_metadata true
app_identifier = "com.example.app"
app_version("2.1.0")
platform "ios"
"#,
        )
        .unwrap();

        assert_eq!(config.metadata_path.as_deref(), Some("./metadata"));
        assert_eq!(config.screenshots_path.as_deref(), Some("./screenshots"));
        assert_eq!(config.skip_metadata, Some(true));
        assert_eq!(config.skip_screenshots, None);
        assert_eq!(config.app_identifier.as_deref(), Some("com.example.app"));
        assert_eq!(config.app_version.as_deref(), Some("2.1.0"));
        assert_eq!(config.platform.as_deref(), Some("ios"));
    }

    #[test]
    fn test_api_platform() {
        let with = |p: &str| DeliverfileConfig {
            platform: Some(p.to_string()),
            ..Default::default()
        };
        assert_eq!(with("ios").api_platform(), Some("IOS"));
        assert_eq!(with("osx").api_platform(), Some("MAC_OS"));
        assert_eq!(with("appletvos").api_platform(), Some("TV_OS"));
        assert_eq!(with("xros").api_platform(), Some("VISION_OS"));
        assert_eq!(with("watchos").api_platform(), None);
        assert_eq!(DeliverfileConfig::default().api_platform(), None);
    }

    #[test]
    fn test_invalid_bool_names_key() {
        let err = parse("skip_metadata false\nskip_screenshots maybe\n").unwrap_err();
        match &err {
            MigrateError::Parse { line, message, .. } => {
                assert_eq!(*line, 2);
                assert!(message.contains("skip_screenshots"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bool_case_insensitive() {
        let config = parse("skip_screenshots TRUE\nskip_metadata False").unwrap();
        assert_eq!(config.skip_screenshots, Some(true));
        assert_eq!(config.skip_metadata, Some(false));
    }

    #[test]
    fn test_hash_inside_quotes_and_escapes() {
        let config = parse(r#"metadata_path "./meta#data" # real comment"#).unwrap();
        assert_eq!(config.metadata_path.as_deref(), Some("./meta#data"));

        let config = parse(r#"app_version "1.0 \"beta\" \# \\ done""#).unwrap();
        assert_eq!(config.app_version.as_deref(), Some(r#"1.0 "beta" \# \ done"#));

        let config = parse(r#"metadata_path 'it\'s here'"#).unwrap();
        assert_eq!(config.metadata_path.as_deref(), Some("it's here"));
    }

    #[test]
    fn test_unquoted_value_is_first_token() {
        let config = parse("platform ios extra words").unwrap();
        assert_eq!(config.platform.as_deref(), Some("ios"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = parse("submit_for_review true\nprice_tier 0\nforce(true)\n").unwrap();
        assert_eq!(config, DeliverfileConfig {
            path: PathBuf::from("/project/fastlane/Deliverfile"),
            ..Default::default()
        });
    }

    #[test]
    fn test_empty_value_is_error() {
        for content in ["metadata_path", "metadata_path \"\"", "app_version()"] {
            let err = parse(content).unwrap_err();
            assert!(
                matches!(err, MigrateError::Parse { line: 1, .. }),
                "content {content:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse("\n\nmetadata_path \"./metadata").unwrap_err();
        assert!(matches!(err, MigrateError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_relative_paths_resolve_against_deliverfile() {
        let config = parse("metadata_path \"./custom_metadata\"\nscreenshots_path \"/abs/shots\"").unwrap();
        assert_eq!(
            config.metadata_dir(),
            Some(PathBuf::from("/project/fastlane/./custom_metadata"))
        );
        assert_eq!(config.screenshots_dir(), Some(PathBuf::from("/abs/shots")));
    }

    #[test]
    fn test_parse_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Deliverfile");
        std::fs::write(&path, "app_identifier \"com.example\"\n").unwrap();
        let config = parse_deliverfile(&path).unwrap();
        assert_eq!(config.app_identifier.as_deref(), Some("com.example"));
        assert_eq!(config.base_dir(), temp.path());

        let missing = parse_deliverfile(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(missing, MigrateError::Read { .. }));
    }
}
