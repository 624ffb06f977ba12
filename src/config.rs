//! Configuration management for the LED matrix display server.
//!
//! Handles loading, saving, and validating configuration from JSON files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/opt/led-matrix/config.json";

/// Per-app settings values, keyed by field name
pub type AppSettings = serde_json::Map<String, serde_json::Value>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// LED matrix panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Panel width in pixels
    #[serde(default = "default_panel_width")]
    pub width: u32,

    /// Panel height in pixels
    #[serde(default = "default_panel_height")]
    pub height: u32,

    /// Render tick rate in frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate_hz: u32,

    /// Panel brightness in percent (0-100)
    #[serde(default = "default_brightness")]
    pub brightness: u8,
}

/// GPIO button configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonConfig {
    /// GPIO BCM pin number
    #[serde(default = "default_button_pin")]
    pub pin: u8,

    /// Hold duration in milliseconds that classifies a press as long
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,

    /// Minimum signal stability window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Saved WiFi network profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WifiProfile {
    pub ssid: String,
    pub secret: String,
}

/// Network and captive portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// WiFi interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// SSID broadcast by the setup access point
    #[serde(default = "default_ap_ssid")]
    pub ap_ssid: String,

    /// Optional AP password (open network when absent)
    #[serde(default)]
    pub ap_password: Option<String>,

    /// Captive portal web server port
    #[serde(default = "default_portal_port")]
    pub portal_port: u16,

    /// Link status poll interval in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// AP bring-up attempts before giving up
    #[serde(default = "default_ap_attempts")]
    pub ap_retry_attempts: u32,

    /// Base delay for exponential AP retry backoff, in seconds
    #[serde(default = "default_ap_backoff")]
    pub ap_retry_base_secs: u64,

    /// Timeout for a station-mode join attempt, in seconds
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,

    /// Saved network credentials (written on successful join)
    #[serde(default)]
    pub saved_profile: Option<WifiProfile>,
}

/// App scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsConfig {
    /// Name of the app activated at startup
    #[serde(default = "default_active_app")]
    pub active_app: String,

    /// Automatic rotation between registered apps
    #[serde(default)]
    pub rotation_enabled: bool,

    /// Seconds between automatic app switches
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,

    /// Per-app settings values, keyed by app name
    #[serde(default)]
    pub settings: HashMap<String, AppSettings>,
}

fn default_panel_width() -> u32 {
    64
}

fn default_panel_height() -> u32 {
    64
}

fn default_frame_rate() -> u32 {
    30
}

fn default_brightness() -> u8 {
    50
}

fn default_button_pin() -> u8 {
    17
}

fn default_long_press_ms() -> u64 {
    3000
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_ap_ssid() -> String {
    "LED-Display-Setup".to_string()
}

fn default_portal_port() -> u16 {
    80
}

fn default_monitor_interval() -> u64 {
    5
}

fn default_ap_attempts() -> u32 {
    3
}

fn default_ap_backoff() -> u64 {
    2
}

fn default_join_timeout() -> u64 {
    25
}

fn default_active_app() -> String {
    "clock".to_string()
}

fn default_rotation_interval() -> u64 {
    30
}

fn default_web_port() -> u16 {
    8080
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_panel_width(),
            height: default_panel_height(),
            frame_rate_hz: default_frame_rate(),
            brightness: default_brightness(),
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: default_button_pin(),
            long_press_ms: default_long_press_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            ap_ssid: default_ap_ssid(),
            ap_password: None,
            portal_port: default_portal_port(),
            monitor_interval_secs: default_monitor_interval(),
            ap_retry_attempts: default_ap_attempts(),
            ap_retry_base_secs: default_ap_backoff(),
            join_timeout_secs: default_join_timeout(),
            saved_profile: None,
        }
    }
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            active_app: default_active_app(),
            rotation_enabled: false,
            rotation_interval_secs: default_rotation_interval(),
            settings: HashMap::new(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub button: ButtonConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub apps: AppsConfig,

    /// Admin web server port
    #[serde(default = "default_web_port")]
    pub web_port: u16,
}

// Must pass validate(); a derived Default would zero web_port
impl Default for Config {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            button: ButtonConfig::default(),
            network: NetworkConfig::default(),
            apps: AppsConfig::default(),
            web_port: default_web_port(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file atomically
    ///
    /// Uses a write-to-temp-then-rename pattern to prevent corruption
    /// if power is lost during the write operation. This is critical
    /// for reliability on embedded devices without UPS.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;

        // Atomic rename - either fully succeeds or fails, never partial
        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ConfigError::ReadError(e)
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display.width < 8 || self.display.width > 512 {
            return Err(ConfigError::ValidationError(
                "display.width must be between 8 and 512".to_string(),
            ));
        }

        if self.display.height < 8 || self.display.height > 512 {
            return Err(ConfigError::ValidationError(
                "display.height must be between 8 and 512".to_string(),
            ));
        }

        if self.display.frame_rate_hz < 1 || self.display.frame_rate_hz > 120 {
            return Err(ConfigError::ValidationError(
                "display.frame_rate_hz must be between 1 and 120".to_string(),
            ));
        }

        if self.display.brightness > 100 {
            return Err(ConfigError::ValidationError(
                "display.brightness must be between 0 and 100".to_string(),
            ));
        }

        if self.button.pin > 27 {
            return Err(ConfigError::ValidationError(
                "button.pin must be a BCM pin number (0-27)".to_string(),
            ));
        }

        if self.button.long_press_ms < 500 {
            return Err(ConfigError::ValidationError(
                "button.long_press_ms must be at least 500".to_string(),
            ));
        }

        if self.network.ap_ssid.is_empty() || self.network.ap_ssid.len() > 32 {
            return Err(ConfigError::ValidationError(
                "network.ap_ssid must be 1-32 characters".to_string(),
            ));
        }

        if self.network.portal_port == 0 {
            return Err(ConfigError::ValidationError(
                "network.portal_port must be greater than 0".to_string(),
            ));
        }

        // Upper bound keeps the exponential backoff shift in range
        if self.network.ap_retry_attempts == 0 || self.network.ap_retry_attempts > 10 {
            return Err(ConfigError::ValidationError(
                "network.ap_retry_attempts must be between 1 and 10".to_string(),
            ));
        }

        if self.network.join_timeout_secs < 5 {
            return Err(ConfigError::ValidationError(
                "network.join_timeout_secs must be at least 5".to_string(),
            ));
        }

        if self.apps.rotation_interval_secs < 5 {
            return Err(ConfigError::ValidationError(
                "apps.rotation_interval_secs must be at least 5".to_string(),
            ));
        }

        if self.web_port == 0 {
            return Err(ConfigError::ValidationError(
                "web_port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Thread-safe configuration store with file persistence
///
/// Components that change persisted state (active app, app settings,
/// brightness, saved network profile) write through this so every change
/// lands on disk immediately.
pub struct ConfigStore {
    path: PathBuf,
    config: std::sync::Mutex<Config>,
}

impl ConfigStore {
    /// Create a store around an already loaded configuration
    pub fn new<P: Into<PathBuf>>(path: P, config: Config) -> Self {
        Self {
            path: path.into(),
            config: std::sync::Mutex::new(config),
        }
    }

    /// Get a snapshot of the current configuration
    pub fn get(&self) -> Config {
        self.config.lock().expect("config lock poisoned").clone()
    }

    /// Apply a change, validate, and persist it
    ///
    /// The in-memory config is only replaced when both validation and the
    /// file write succeed, so a bad update never leaves a half-applied state.
    pub fn update<F>(&self, mutate: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.config.lock().expect("config lock poisoned");
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.validate()?;
        candidate.save(&self.path)?;
        *guard = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.web_port, default_web_port());
    }

    #[test]
    fn store_persists_changes_from_default_config() {
        let dir = std::env::temp_dir().join("led-matrix-fresh-boot-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        // First boot: no config file, store starts from the fallback
        let store = ConfigStore::new(&path, Config::default());
        store
            .update(|c| c.apps.active_app = "text".to_string())
            .expect("update from default config");
        assert_eq!(Config::load(&path).unwrap().apps.active_app, "text");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_out_of_range_brightness() {
        let mut config = Config::default();
        config.display.brightness = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_excessive_ap_retry_attempts() {
        let mut config = Config::default();
        config.network.ap_retry_attempts = 65;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_rotation_interval() {
        let mut config = Config::default();
        config.apps.rotation_interval_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = std::env::temp_dir().join("led-matrix-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = Config::default();
        config.apps.active_app = "text".to_string();
        config.network.saved_profile = Some(WifiProfile {
            ssid: "HomeNet".to_string(),
            secret: "hunter2".to_string(),
        });
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.apps.active_app, "text");
        assert_eq!(
            loaded.network.saved_profile.as_ref().unwrap().ssid,
            "HomeNet"
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn store_rejects_invalid_update_and_keeps_previous() {
        let dir = std::env::temp_dir().join("led-matrix-store-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let store = ConfigStore::new(&path, Config::default());
        store
            .update(|c| c.display.brightness = 80)
            .expect("valid update");

        let err = store.update(|c| c.display.brightness = 200);
        assert!(err.is_err());
        assert_eq!(store.get().display.brightness, 80);

        std::fs::remove_file(&path).unwrap();
    }
}
