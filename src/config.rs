// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and key is optional. A missing file yields the defaults; a
// malformed file is reported and also falls back to the defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello Triangle".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Clear color baked into the pre-recorded command buffers.
    pub clear_color: [f32; 4],
    /// Block on a fence before reusing the frame semaphores. Turning this off
    /// leaves ordering to the two semaphores alone.
    pub wait_for_previous_frame: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            wait_for_previous_frame: true,
        }
    }
}

/// Locations of the compiled SPIR-V modules
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

/// Where the loaded values came from. Produced before logging is up and
/// reported by the caller once it is.
#[derive(Debug)]
pub enum ConfigOrigin {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but could not be read or parsed; defaults were used.
    Invalid(anyhow::Error),
}

impl ConfigOrigin {
    pub fn log(&self) {
        match self {
            Self::File(path) => log::info!("Loaded configuration from {:?}", path),
            Self::Missing(path) => log::info!("Config file not found at {:?}, using defaults", path),
            Self::Invalid(e) => log::warn!("{:#}. Using defaults.", e),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to defaults.
    pub fn load() -> (Self, ConfigOrigin) {
        Self::load_or_default("config.toml")
    }

    /// Never fails: a missing or malformed file yields the defaults, and the
    /// origin says which case applied.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigOrigin) {
        let path = path.as_ref();

        if !path.exists() {
            return (Config::default(), ConfigOrigin::Missing(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigOrigin::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigOrigin::Invalid(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Diagnostics are a compile-time toggle: release builds never load the
    /// validation layers regardless of the file.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Parsed log level, `None` when the configured string is not a level name.
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        self.debug.log_level.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.graphics.wait_for_previous_frame);
        assert_eq!(
            config.shaders.vertex,
            PathBuf::from("shaders/triangle.vert.spv")
        );
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1024

            [graphics]
            wait_for_previous_frame = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Hello Triangle");
        assert!(!config.graphics.wait_for_previous_frame);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "triangle-renderer-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let (config, origin) = Config::load_or_default("does/not/exist/config.toml");
        assert_eq!(config.window.title, "Hello Triangle");
        assert!(matches!(origin, ConfigOrigin::Missing(_)));
        assert!(Config::load_from_path("does/not/exist/config.toml").is_err());
    }

    #[test]
    fn malformed_file_yields_defaults_and_reports_why() {
        let path = scratch_file("malformed.toml", "[window]\nwidth = \"wide\"\n");

        let (config, origin) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.title, "Hello Triangle");
        match origin {
            ConfigOrigin::Invalid(e) => {
                let message = format!("{:#}", e);
                assert!(message.contains("Failed to parse config file"));
                assert!(message.contains("malformed.toml"));
            }
            other => panic!("expected an invalid origin, got {:?}", other),
        }
    }

    #[test]
    fn valid_file_is_loaded() {
        let path = scratch_file("valid.toml", "[window]\ntitle = \"Resized\"\nwidth = 1280\n");

        let (config, origin) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.title, "Resized");
        assert_eq!(config.window.width, 1280);
        assert!(matches!(origin, ConfigOrigin::File(p) if p == path));
    }

    #[test]
    fn log_level_parsing() {
        let mut config = Config::default();
        assert_eq!(config.log_level(), Some(log::LevelFilter::Info));

        config.debug.log_level = "debug".to_string();
        assert_eq!(config.log_level(), Some(log::LevelFilter::Debug));

        config.debug.log_level = "loud".to_string();
        assert_eq!(config.log_level(), None);
    }
}
