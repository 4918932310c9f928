//! Application Configuration
//!
//! User settings stored in TOML format. Every section has defaults, so a
//! partial file (or none at all) loads fine.

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::hotkey::{DetailHotkey, Key};
use crate::vision::{DetectorParams, LibraryPaths, MatcherParams};

/// Configuration shared between the scan worker and its owner
pub type SharedConfig = Arc<RwLock<AppConfig>>;

pub const CONFIG_FILE: &str = "config.toml";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Scan loop behaviour
    pub scan: ScanSettings,
    /// Object detector
    pub detector: DetectorSettings,
    /// Feature matching
    pub matcher: MatcherParams,
    /// Resource and cache locations
    pub paths: PathSettings,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Title of the game window to follow
    pub game_window_title: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            game_window_title: "The Bazaar".to_string(),
        }
    }
}

/// Scan loop settings, re-read while the loop runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Master switch for hover scanning
    pub auto_scan_enabled: bool,
    /// Key or mouse button that forces the detail view, `"none"` to disable
    #[serde(with = "crate::hotkey::optional")]
    pub detail_hotkey: Option<DetailHotkey>,
    /// Hover time before a recognition is attempted
    pub dwell_ms: u64,
    /// Centre movement (pixels) still treated as the same object
    pub jitter_px: u32,
    /// Pause after each hotkey-triggered detail
    pub hotkey_debounce_ms: u64,
    /// How often the loop re-reads this configuration
    pub config_reload_secs: u64,
    /// Pacing between frames
    pub frame_interval_ms: u64,
    /// Show details as soon as a hovered object is recognized
    pub show_on_hover: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            auto_scan_enabled: true,
            detail_hotkey: Some(DetailHotkey::Keyboard(vec![Key::Shift])),
            dwell_ms: 200,
            jitter_px: 50,
            hotkey_debounce_ms: 300,
            config_reload_secs: 2,
            frame_interval_ms: 50,
            show_on_hover: false,
        }
    }
}

impl ScanSettings {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn hotkey_debounce(&self) -> Duration {
        Duration::from_millis(self.hotkey_debounce_ms)
    }

    pub fn config_reload(&self) -> Duration {
        Duration::from_secs(self.config_reload_secs.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Detector model and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// ONNX model, relative paths resolve against the resources directory
    pub model_path: PathBuf,
    #[serde(flatten)]
    pub params: DetectorParams,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/bazaar_detector.onnx"),
            params: DetectorParams::default(),
        }
    }
}

/// Resource and cache locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Directory with the JSON databases and images (default: ./resources)
    pub resources_dir: Option<PathBuf>,
    /// Descriptor cache directory (default: platform cache dir)
    pub cache_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn resources_dir(&self) -> PathBuf {
        self.paths
            .resources_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("resources"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.paths.cache_dir {
            return dir.clone();
        }
        crate::storage::get_cache_dir().unwrap_or_else(|e| {
            warn!("No platform cache directory ({}), using resources/cache", e);
            self.resources_dir().join("cache")
        })
    }

    pub fn library_paths(&self) -> LibraryPaths {
        LibraryPaths::new(self.resources_dir(), self.cache_dir())
    }

    pub fn model_path(&self) -> PathBuf {
        if self.detector.model_path.is_absolute() {
            self.detector.model_path.clone()
        } else {
            self.resources_dir().join(&self.detector.model_path)
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.detector.params.input_size == 0 {
            bail!("detector.input_size must be greater than zero");
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file doesn't exist
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    } else {
        info!("No configuration at {:?}, using defaults", path);
        Ok(AppConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))?;
    Ok(())
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::MouseButton;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.general.game_window_title, "The Bazaar");

        assert!(config.scan.auto_scan_enabled);
        assert_eq!(config.scan.dwell_ms, 200);
        assert_eq!(config.scan.jitter_px, 50);
        assert_eq!(config.scan.hotkey_debounce_ms, 300);
        assert_eq!(config.scan.config_reload(), Duration::from_secs(2));
        assert!(!config.scan.show_on_hover);

        assert_eq!(config.detector.params.input_size, 640);
        assert!((config.detector.params.iou_threshold - 0.45).abs() < 1e-6);

        assert!((config.matcher.ratio - 0.75).abs() < 1e-6);
        assert!((config.matcher.match_threshold - 0.05).abs() < 1e-6);
        assert_eq!(config.matcher.orb.nfeatures, 500);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.general.game_window_title, parsed.general.game_window_title);
        assert_eq!(config.scan.detail_hotkey, parsed.scan.detail_hotkey);
        assert_eq!(config.detector.model_path, parsed.detector.model_path);
        assert_eq!(config.matcher.orb.nlevels, parsed.matcher.orb.nlevels);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [scan]
            detail_hotkey = "mouse:x1"
            dwell_ms = 350

            [detector]
            confidence_threshold = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(parsed.scan.detail_hotkey, Some(DetailHotkey::Mouse(MouseButton::X1)));
        assert_eq!(parsed.scan.dwell_ms, 350);
        assert_eq!(parsed.scan.jitter_px, 50);
        assert!((parsed.detector.params.confidence_threshold - 0.6).abs() < 1e-6);
        assert_eq!(parsed.detector.params.max_detections, 100);
        assert_eq!(parsed.general.game_window_title, "The Bazaar");
    }

    #[test]
    fn test_disabled_hotkey_survives_save_and_load() {
        let mut config = AppConfig::default();
        config.scan.detail_hotkey = None;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("detail_hotkey = \"none\""));

        let loaded = load_config(temp_file.path()).unwrap();
        assert_eq!(loaded.scan.detail_hotkey, None);

        let off: AppConfig = toml::from_str("[scan]\ndetail_hotkey = \"off\"\n").unwrap();
        assert_eq!(off.scan.detail_hotkey, None);
    }

    #[test]
    fn test_invalid_hotkey_is_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[scan]\ndetail_hotkey = \"Hyper+Q\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.scan.auto_scan_enabled = false;
        config.paths.resources_dir = Some(PathBuf::from("/opt/bazaar"));

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert!(!loaded.scan.auto_scan_enabled);
        assert_eq!(loaded.model_path(), PathBuf::from("/opt/bazaar/models/bazaar_detector.onnx"));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
        assert!(load_or_default(Path::new("/nonexistent/path/config.toml")).is_ok());
    }

    #[test]
    fn test_zero_input_size_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[detector]\ninput_size = 0").unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("input_size"));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
