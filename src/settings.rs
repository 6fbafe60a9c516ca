// ============================================================================
// SETTINGS: persisted editor preferences (TOML in the platform config dir)
// ============================================================================

use std::path::{Path, PathBuf};

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::DEFAULT_SHAPE;
use crate::io::{ExportOptions, TiffCompression};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("No configuration directory on this platform")]
    NoConfigDir,
}

/// `<config_dir>/epigimp`
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("epigimp"))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    /// Size and fill of documents created with `--new`.
    pub new_image: NewImageSettings,
    pub export: ExportSettings,
    pub log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFill {
    #[default]
    White,
    Transparent,
    Custom([u8; 4]),
}

impl BackgroundFill {
    pub fn color(&self) -> Rgba<u8> {
        match self {
            BackgroundFill::White => Rgba([255, 255, 255, 255]),
            BackgroundFill::Transparent => Rgba([0, 0, 0, 0]),
            BackgroundFill::Custom(c) => Rgba(*c),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewImageSettings {
    pub width: u32,
    pub height: u32,
    pub background: BackgroundFill,
}

impl Default for NewImageSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_SHAPE.1,
            height: DEFAULT_SHAPE.0,
            background: BackgroundFill::White,
        }
    }
}

impl NewImageSettings {
    /// (height, width)
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub jpeg_quality: u8,
    pub tiff_compression: TiffCompression,
}

impl Default for ExportSettings {
    fn default() -> Self {
        let opts = ExportOptions::default();
        Self {
            jpeg_quality: opts.jpeg_quality,
            tiff_compression: opts.tiff_compression,
        }
    }
}

impl ExportSettings {
    pub fn to_options(&self) -> ExportOptions {
        ExportOptions {
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
            tiff_compression: self.tiff_compression,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl EditorSettings {
    const FILENAME: &'static str = "settings.toml";

    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(config_dir()?.join(Self::FILENAME))
    }

    /// Load from the default location. Missing or malformed files yield defaults.
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            log::warn!("No config directory, using default settings");
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring settings at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::default_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        log::debug!("Settings written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("epigimp-settings-{}", uuid::Uuid::new_v4()))
            .join("settings.toml")
    }

    #[test]
    fn save_and_reload() {
        let path = temp_path();
        let mut settings = EditorSettings::default();
        settings.new_image.background = BackgroundFill::Custom([1, 2, 3, 4]);
        settings.export.tiff_compression = TiffCompression::Lzw;
        settings.log_level = LogLevel::Debug;
        settings.new_image.width = 64;

        settings.save_to(&path).unwrap();
        let loaded = EditorSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let settings: EditorSettings = toml::from_str(
            "log_level = \"warn\"\n[export]\njpeg_quality = 70\n",
        )
        .unwrap();
        assert_eq!(settings.log_level, LogLevel::Warn);
        assert_eq!(settings.export.jpeg_quality, 70);
        assert_eq!(settings.export.tiff_compression, TiffCompression::None);
        assert_eq!(settings.new_image.shape(), DEFAULT_SHAPE);
        assert_eq!(settings.new_image.background, BackgroundFill::White);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "log_level = [").unwrap();
        assert!(matches!(EditorSettings::load_from(&path), Err(SettingsError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn export_quality_is_clamped() {
        let export = ExportSettings { jpeg_quality: 0, ..Default::default() };
        assert_eq!(export.to_options().jpeg_quality, 1);
    }

    #[test]
    fn stale_sections_are_ignored() {
        let settings: EditorSettings = toml::from_str(
            "[general]\nshow_welcome_screen = false\n[new_image]\nwidth = 320\nbackground = \"transparent\"\n",
        )
        .unwrap();
        assert_eq!(settings.new_image.shape(), (DEFAULT_SHAPE.0, 320));
        assert_eq!(settings.new_image.background, BackgroundFill::Transparent);
    }

    #[test]
    fn background_colors() {
        assert_eq!(BackgroundFill::White.color(), Rgba([255, 255, 255, 255]));
        assert_eq!(BackgroundFill::Transparent.color().0[3], 0);
    }
}
