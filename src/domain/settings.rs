use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
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
    "heart_rate_ble".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Bluetooth acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    /// Name prefix tried first during device discovery
    #[serde(default = "default_device_name_prefix")]
    pub device_name_prefix: String,
    /// How long each discovery strategy scans before giving up
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Duration of a device listing scan
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub mock_tick_interval_ms: u64,
    /// Pause between the two control point enable writes
    #[serde(default = "default_control_point_delay_ms")]
    pub control_point_delay_ms: u64,
    #[serde(default = "default_false")]
    pub start_in_mock_mode: bool,
    #[serde(default = "default_false")]
    pub debug_raw_data_logging: bool,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            device_name_prefix: default_device_name_prefix(),
            scan_timeout_ms: default_scan_timeout_ms(),
            scan_duration_ms: default_scan_duration_ms(),
            poll_interval_ms: default_interval_ms(),
            mock_tick_interval_ms: default_interval_ms(),
            control_point_delay_ms: default_control_point_delay_ms(),
            start_in_mock_mode: false,
            debug_raw_data_logging: false,
        }
    }
}

fn default_device_name_prefix() -> String {
    "WHOOP".to_string()
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_scan_duration_ms() -> u64 {
    5_000
}
fn default_interval_ms() -> u64 {
    1_000
}
fn default_control_point_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub last_connected_device: Option<String>,
    #[serde(default)]
    pub known_devices: Vec<String>,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HeartRateMonitor");
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

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Record a successfully connected device and persist
    pub fn remember_device(&mut self, device_id: &str) -> anyhow::Result<()> {
        if !self.settings.known_devices.iter().any(|d| d == device_id) {
            self.settings.known_devices.push(device_id.to_string());
        }
        self.settings.last_connected_device = Some(device_id.to_string());
        self.save()
    }
}
