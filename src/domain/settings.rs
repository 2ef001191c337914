use crate::infrastructure::bluetooth::protocol::{self, CharacteristicMap};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ir_blaster".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Peripheral used when the CLI is not given an address
    #[serde(default)]
    pub device_address: Option<String>,

    // Timeouts
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_learn_timeout_ms")]
    pub learn_timeout_ms: u64,

    // Characteristic UUIDs
    #[serde(default = "default_data_write_uuid")]
    pub data_write_uuid: String,
    #[serde(default = "default_data_notify_uuid")]
    pub data_notify_uuid: String,
    #[serde(default = "default_control_write_uuid")]
    pub control_write_uuid: String,
    #[serde(default = "default_control_notify_uuid")]
    pub control_notify_uuid: String,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_address: None,
            operation_timeout_ms: default_operation_timeout_ms(),
            learn_timeout_ms: default_learn_timeout_ms(),
            data_write_uuid: default_data_write_uuid(),
            data_notify_uuid: default_data_notify_uuid(),
            control_write_uuid: default_control_write_uuid(),
            control_notify_uuid: default_control_notify_uuid(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn learn_timeout(&self) -> Duration {
        Duration::from_millis(self.learn_timeout_ms)
    }

    /// Parse the configured UUID strings.
    pub fn characteristics(&self) -> anyhow::Result<CharacteristicMap> {
        Ok(CharacteristicMap {
            data_write: protocol::parse_uuid(&self.data_write_uuid)?,
            data_notify: protocol::parse_uuid(&self.data_notify_uuid)?,
            control_write: protocol::parse_uuid(&self.control_write_uuid)?,
            control_notify: protocol::parse_uuid(&self.control_notify_uuid)?,
        })
    }
}

fn default_operation_timeout_ms() -> u64 {
    5000
}
fn default_learn_timeout_ms() -> u64 {
    20000
}
fn default_data_write_uuid() -> String {
    protocol::DATA_WRITE_UUID.to_string()
}
fn default_data_notify_uuid() -> String {
    protocol::DATA_NOTIFY_UUID.to_string()
}
fn default_control_write_uuid() -> String {
    protocol::CONTROL_WRITE_UUID.to_string()
}
fn default_control_notify_uuid() -> String {
    protocol::CONTROL_NOTIFY_UUID.to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is missing or unreadable.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("IrBlaster");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"learn_timeout_ms": 30000}"#).unwrap();
        assert_eq!(settings.learn_timeout(), Duration::from_secs(30));
        assert_eq!(settings.operation_timeout(), Duration::from_secs(5));
        assert_eq!(settings.data_write_uuid, protocol::DATA_WRITE_UUID);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_characteristics_parse_defaults() {
        let map = Settings::default().characteristics().unwrap();
        assert_eq!(map, CharacteristicMap::default());
    }

    #[test]
    fn test_characteristics_reject_bad_uuid() {
        let settings = Settings {
            control_write_uuid: "not-a-uuid".to_string(),
            ..Default::default()
        };
        assert!(settings.characteristics().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "ir_blaster_settings_{}.json",
            std::process::id()
        ));
        let mut service = SettingsService::from_path(path.clone());
        service.get_mut().device_address = Some("AA:BB:CC:DD:EE:FF".to_string());
        service.save().unwrap();

        let reloaded = SettingsService::from_path(path.clone());
        assert_eq!(
            reloaded.get().device_address.as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let service = SettingsService::from_path(PathBuf::from("/nonexistent/ir_blaster.json"));
        assert_eq!(service.get().operation_timeout_ms, 5000);
    }
}
