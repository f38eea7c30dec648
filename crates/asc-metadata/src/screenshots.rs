//! Screenshot display type inference.
//!
//! A file name hint wins; otherwise the image header is read and the pixel
//! size looked up, longer side first so orientation does not matter.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::{MigrateError, Result};

/// App Store Connect screenshot display types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DisplayType {
    AppIphone67,
    AppIphone65,
    AppIphone61,
    AppIphone58,
    AppIphone55,
    AppIphone47,
    AppIphone40,
    AppIphone35,
    AppIpadPro3Gen129,
    AppIpadPro3Gen11,
    AppIpadPro129,
    AppIpad105,
    AppIpad97,
    AppDesktop,
    AppAppleTv,
    AppAppleVisionPro,
    AppWatchUltra,
    AppWatchSeries10,
    AppWatchSeries7,
    AppWatchSeries4,
    AppWatchSeries3,
}

impl DisplayType {
    pub const ALL: &'static [DisplayType] = &[
        DisplayType::AppIphone67,
        DisplayType::AppIphone65,
        DisplayType::AppIphone61,
        DisplayType::AppIphone58,
        DisplayType::AppIphone55,
        DisplayType::AppIphone47,
        DisplayType::AppIphone40,
        DisplayType::AppIphone35,
        DisplayType::AppIpadPro3Gen129,
        DisplayType::AppIpadPro3Gen11,
        DisplayType::AppIpadPro129,
        DisplayType::AppIpad105,
        DisplayType::AppIpad97,
        DisplayType::AppDesktop,
        DisplayType::AppAppleTv,
        DisplayType::AppAppleVisionPro,
        DisplayType::AppWatchUltra,
        DisplayType::AppWatchSeries10,
        DisplayType::AppWatchSeries7,
        DisplayType::AppWatchSeries4,
        DisplayType::AppWatchSeries3,
    ];

    /// The value App Store Connect uses for `screenshotDisplayType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayType::AppIphone67 => "APP_IPHONE_67",
            DisplayType::AppIphone65 => "APP_IPHONE_65",
            DisplayType::AppIphone61 => "APP_IPHONE_61",
            DisplayType::AppIphone58 => "APP_IPHONE_58",
            DisplayType::AppIphone55 => "APP_IPHONE_55",
            DisplayType::AppIphone47 => "APP_IPHONE_47",
            DisplayType::AppIphone40 => "APP_IPHONE_40",
            DisplayType::AppIphone35 => "APP_IPHONE_35",
            DisplayType::AppIpadPro3Gen129 => "APP_IPAD_PRO_3GEN_129",
            DisplayType::AppIpadPro3Gen11 => "APP_IPAD_PRO_3GEN_11",
            DisplayType::AppIpadPro129 => "APP_IPAD_PRO_129",
            DisplayType::AppIpad105 => "APP_IPAD_105",
            DisplayType::AppIpad97 => "APP_IPAD_97",
            DisplayType::AppDesktop => "APP_DESKTOP",
            DisplayType::AppAppleTv => "APP_APPLE_TV",
            DisplayType::AppAppleVisionPro => "APP_APPLE_VISION_PRO",
            DisplayType::AppWatchUltra => "APP_WATCH_ULTRA",
            DisplayType::AppWatchSeries10 => "APP_WATCH_SERIES_10",
            DisplayType::AppWatchSeries7 => "APP_WATCH_SERIES_7",
            DisplayType::AppWatchSeries4 => "APP_WATCH_SERIES_4",
            DisplayType::AppWatchSeries3 => "APP_WATCH_SERIES_3",
        }
    }
}

impl FromStr for DisplayType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DisplayType::ALL
            .iter()
            .find(|d| d.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown display type {}", s))
    }
}

impl fmt::Display for DisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DisplayType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Returns true if `value` is a display type App Store Connect accepts.
pub fn is_valid_display_type(value: &str) -> bool {
    value.parse::<DisplayType>().is_ok()
}

/// Device name fragments found in screenshot file names. Checked in order
/// against the lower-cased name with `_` and `-` read as spaces.
const FILE_NAME_HINTS: &[(&str, &str)] = &[
    ("iphone 6.9", "APP_IPHONE_67"),
    ("iphone 6.7", "APP_IPHONE_67"),
    ("iphone 6.5", "APP_IPHONE_65"),
    ("iphone 6.1", "APP_IPHONE_61"),
    ("iphone 5.8", "APP_IPHONE_58"),
    ("iphone 5.5", "APP_IPHONE_55"),
    ("iphone 4.7", "APP_IPHONE_47"),
    ("iphone 4.0", "APP_IPHONE_40"),
    ("iphone 3.5", "APP_IPHONE_35"),
    ("ipad pro 13", "APP_IPAD_PRO_3GEN_129"),
    ("ipad pro 12.9", "APP_IPAD_PRO_3GEN_129"),
    ("ipad 12.9", "APP_IPAD_PRO_3GEN_129"),
    ("ipad pro 11", "APP_IPAD_PRO_3GEN_11"),
    ("ipad 11", "APP_IPAD_PRO_3GEN_11"),
    ("ipad 10.5", "APP_IPAD_105"),
    ("ipad 9.7", "APP_IPAD_97"),
    ("apple tv", "APP_APPLE_TV"),
    ("vision pro", "APP_APPLE_VISION_PRO"),
    ("watch ultra", "APP_WATCH_ULTRA"),
    ("watch series 10", "APP_WATCH_SERIES_10"),
    ("watch series 7", "APP_WATCH_SERIES_7"),
    ("watch series 4", "APP_WATCH_SERIES_4"),
    ("watch series 3", "APP_WATCH_SERIES_3"),
    ("macos", "APP_DESKTOP"),
    ("desktop", "APP_DESKTOP"),
];

/// Exact pixel sizes as (longer side, shorter side).
const DIMENSIONS: &[((u32, u32), &str)] = &[
    // iPhone
    ((2868, 1320), "APP_IPHONE_67"),
    ((2796, 1290), "APP_IPHONE_67"),
    ((2778, 1284), "APP_IPHONE_65"),
    ((2688, 1242), "APP_IPHONE_65"),
    ((2556, 1179), "APP_IPHONE_61"),
    ((2532, 1170), "APP_IPHONE_61"),
    ((2436, 1125), "APP_IPHONE_58"),
    ((2208, 1242), "APP_IPHONE_55"),
    ((1334, 750), "APP_IPHONE_47"),
    ((1136, 640), "APP_IPHONE_40"),
    ((960, 640), "APP_IPHONE_35"),
    // iPad
    ((2752, 2064), "APP_IPAD_PRO_3GEN_129"),
    ((2732, 2048), "APP_IPAD_PRO_3GEN_129"),
    ((2420, 1668), "APP_IPAD_PRO_3GEN_11"),
    ((2388, 1668), "APP_IPAD_PRO_3GEN_11"),
    ((2224, 1668), "APP_IPAD_105"),
    ((2048, 1536), "APP_IPAD_97"),
    // Mac
    ((2880, 1800), "APP_DESKTOP"),
    ((2560, 1600), "APP_DESKTOP"),
    ((1440, 900), "APP_DESKTOP"),
    ((1280, 800), "APP_DESKTOP"),
    // Apple TV
    ((3840, 2160), "APP_APPLE_TV"),
    ((1920, 1080), "APP_APPLE_TV"),
    // Watch
    ((502, 410), "APP_WATCH_ULTRA"),
    ((496, 416), "APP_WATCH_SERIES_10"),
    ((484, 396), "APP_WATCH_SERIES_7"),
    ((448, 368), "APP_WATCH_SERIES_4"),
    ((390, 312), "APP_WATCH_SERIES_3"),
];

/// Display type hinted by a file name, if any.
pub fn classify_file_name(name: &str) -> Option<&'static str> {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();

    FILE_NAME_HINTS
        .iter()
        .find(|(fragment, _)| normalized.contains(fragment))
        .map(|(_, value)| *value)
}

/// Display type for an exact pixel size, in either orientation.
pub fn classify_dimensions(width: u32, height: u32) -> Option<&'static str> {
    let key = (width.max(height), width.min(height));
    DIMENSIONS
        .iter()
        .find(|(dims, _)| *dims == key)
        .map(|(_, value)| *value)
}

/// Infers the display type of a screenshot file.
pub fn classify_screenshot(path: &Path) -> Result<DisplayType> {
    let failed = |message: String| MigrateError::ClassificationFailed {
        path: path.to_path_buf(),
        message,
    };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let value = match classify_file_name(file_name) {
        Some(value) => {
            debug!(file = %path.display(), display_type = value, "classified by file name");
            value
        }
        None => {
            // Reads the header only
            let (width, height) = image::image_dimensions(path)
                .map_err(|e| failed(format!("cannot read image dimensions: {}", e)))?;
            let value = classify_dimensions(width, height).ok_or_else(|| {
                failed(format!(
                    "no device hint in file name and unrecognized dimensions {}x{}",
                    width, height
                ))
            })?;
            debug!(file = %path.display(), width, height, display_type = value, "classified by dimensions");
            value
        }
    };

    value
        .parse::<DisplayType>()
        .map_err(|_| failed(format!("inferred display type {} is not valid", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::new(width, height).save(&path).unwrap();
        path
    }

    #[test]
    fn test_tables_only_name_valid_types() {
        for (_, value) in FILE_NAME_HINTS {
            assert!(is_valid_display_type(value), "{value}");
        }
        for (_, value) in DIMENSIONS {
            assert!(is_valid_display_type(value), "{value}");
        }
        assert!(!is_valid_display_type("APP_IPHONE_99"));
    }

    #[test]
    fn test_dimensions_either_orientation() {
        let temp = TempDir::new().unwrap();
        let portrait = png(temp.path(), "01.png", 1242, 2688);
        let landscape = png(temp.path(), "02.png", 2688, 1242);

        assert_eq!(classify_screenshot(&portrait).unwrap(), DisplayType::AppIphone65);
        assert_eq!(classify_screenshot(&landscape).unwrap(), DisplayType::AppIphone65);
    }

    #[test]
    fn test_file_name_hint_overrides_dimensions() {
        let temp = TempDir::new().unwrap();
        let path = png(temp.path(), "iPhone 6.5 - 01.png", 100, 100);
        assert_eq!(classify_screenshot(&path).unwrap(), DisplayType::AppIphone65);

        let path = png(temp.path(), "shot_IPAD_12.9_home.png", 2688, 1242);
        assert_eq!(classify_screenshot(&path).unwrap(), DisplayType::AppIpadPro3Gen129);
    }

    #[test]
    fn test_unrecognized_fails_naming_file() {
        let temp = TempDir::new().unwrap();
        let path = png(temp.path(), "mystery.png", 123, 456);
        let err = classify_screenshot(&path).unwrap_err();
        match &err {
            MigrateError::ClassificationFailed { path: failed, message } => {
                assert_eq!(failed, &path);
                assert!(message.contains("123x456"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_image_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.png");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(matches!(
            classify_screenshot(&path),
            Err(MigrateError::ClassificationFailed { .. })
        ));
    }

    #[test]
    fn test_watch_and_tv_sizes() {
        assert_eq!(classify_dimensions(410, 502), Some("APP_WATCH_ULTRA"));
        assert_eq!(classify_dimensions(1920, 1080), Some("APP_APPLE_TV"));
        assert_eq!(classify_dimensions(1080, 1920), Some("APP_APPLE_TV"));
        assert_eq!(classify_dimensions(1000, 1000), None);
    }

    #[test]
    fn test_display_type_round_trips_through_str() {
        for display_type in DisplayType::ALL {
            assert_eq!(display_type.as_str().parse::<DisplayType>().unwrap(), *display_type);
        }
    }
}
