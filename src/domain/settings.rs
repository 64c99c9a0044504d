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
    "polar_stream".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Accelerometer stream parameters sent with the start command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccelerometerSettings {
    #[serde(default = "default_acc_sample_rate")]
    pub sample_rate_hz: u16,
    #[serde(default = "default_acc_resolution")]
    pub resolution_bits: u16,
    #[serde(default = "default_acc_range")]
    pub range_g: u16,
    #[serde(default = "default_acc_channels")]
    pub channels: u16,
}

impl Default for AccelerometerSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_acc_sample_rate(),
            resolution_bits: default_acc_resolution(),
            range_g: default_acc_range(),
            channels: default_acc_channels(),
        }
    }
}

fn default_acc_sample_rate() -> u16 {
    52
}
fn default_acc_resolution() -> u16 {
    16
}
fn default_acc_range() -> u16 {
    8
}
fn default_acc_channels() -> u16 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Timeouts
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    // Link Settings
    #[serde(default = "default_preferred_mtu")]
    pub preferred_mtu: u16,
    #[serde(default = "default_queue_capacity")]
    pub notification_queue_capacity: usize,

    // Firmware settling delays
    #[serde(default = "default_subscribe_settle_ms")]
    pub subscribe_settle_ms: u64,
    #[serde(default = "default_sdk_settle_ms")]
    pub sdk_settle_ms: u64,
    #[serde(default = "default_command_settle_ms")]
    pub command_settle_ms: u64,

    // Stream Settings
    #[serde(default)]
    pub accelerometer: AccelerometerSettings,

    // Debug Settings
    #[serde(default = "default_false")]
    pub debug_raw_data_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            preferred_mtu: default_preferred_mtu(),
            notification_queue_capacity: default_queue_capacity(),
            subscribe_settle_ms: default_subscribe_settle_ms(),
            sdk_settle_ms: default_sdk_settle_ms(),
            command_settle_ms: default_command_settle_ms(),
            accelerometer: AccelerometerSettings::default(),
            debug_raw_data_logging: false,
        }
    }
}

impl Settings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn subscribe_settle(&self) -> Duration {
        Duration::from_millis(self.subscribe_settle_ms)
    }

    pub fn sdk_settle(&self) -> Duration {
        Duration::from_millis(self.sdk_settle_ms)
    }

    pub fn command_settle(&self) -> Duration {
        Duration::from_millis(self.command_settle_ms)
    }
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    20_000
}
fn default_write_timeout_ms() -> u64 {
    5_000
}
fn default_preferred_mtu() -> u16 {
    232
}
fn default_queue_capacity() -> usize {
    256
}
fn default_subscribe_settle_ms() -> u64 {
    300
}
fn default_sdk_settle_ms() -> u64 {
    500
}
fn default_command_settle_ms() -> u64 {
    300
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

    /// Load settings from an explicit path, falling back to defaults
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
        path.push("PolarStream");
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

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
