use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

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
    "biosensor_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Device target
    #[serde(default = "default_device_address")]
    pub device_address: String,
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_characteristic_uuid")]
    pub ble_characteristic_uuid: String,

    // Timeouts
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    // Measurement
    #[serde(default = "default_quiescence_secs")]
    pub quiescence_secs: u64,
    #[serde(default = "default_measurement_wait_secs")]
    pub measurement_wait_secs: u64,
    #[serde(default = "default_notification_channel_capacity")]
    pub notification_channel_capacity: usize,

    // Monitor
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            ble_service_uuid: default_service_uuid(),
            ble_characteristic_uuid: default_characteristic_uuid(),
            scan_timeout_secs: default_scan_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            disconnect_timeout_secs: default_disconnect_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            quiescence_secs: default_quiescence_secs(),
            measurement_wait_secs: default_measurement_wait_secs(),
            notification_channel_capacity: default_notification_channel_capacity(),
            monitor_interval_ms: default_monitor_interval_ms(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_device_address() -> String {
    protocol::DEFAULT_DEVICE_ADDRESS.to_string()
}
fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_characteristic_uuid() -> String {
    protocol::CHARACTERISTIC_UUID.to_string()
}
fn default_scan_timeout_secs() -> u64 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    20
}
fn default_disconnect_timeout_secs() -> u64 {
    10
}
fn default_write_timeout_secs() -> u64 {
    5
}
fn default_quiescence_secs() -> u64 {
    10
}
fn default_measurement_wait_secs() -> u64 {
    30
}
fn default_notification_channel_capacity() -> usize {
    256
}
fn default_monitor_interval_ms() -> u64 {
    1000
}

impl Settings {
    /// Validate and convert into the runtime form used by the session layer
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        if self.notification_channel_capacity == 0 {
            anyhow::bail!("notification_channel_capacity must be at least 1");
        }
        if self.monitor_interval_ms == 0 {
            anyhow::bail!("monitor_interval_ms must be at least 1");
        }

        Ok(SessionConfig {
            device_address: self.device_address.clone(),
            service_uuid: protocol::parse_uuid(&self.ble_service_uuid)?,
            characteristic_uuid: protocol::parse_uuid(&self.ble_characteristic_uuid)?,
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            disconnect_timeout: Duration::from_secs(self.disconnect_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            quiescence: Duration::from_secs(self.quiescence_secs),
            measurement_wait: Duration::from_secs(self.measurement_wait_secs),
            notification_channel_capacity: self.notification_channel_capacity,
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
        })
    }
}

/// Runtime configuration shared by the connection manager, measurement
/// driver and connection monitor
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_address: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub write_timeout: Duration,
    /// Wait after the last command so trailing notifications arrive
    pub quiescence: Duration,
    /// How long a disconnect waits for an in-flight measurement before aborting it
    pub measurement_wait: Duration,
    pub notification_channel_capacity: usize,
    pub monitor_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_address: protocol::DEFAULT_DEVICE_ADDRESS.to_string(),
            service_uuid: protocol::SERVICE,
            characteristic_uuid: protocol::CHARACTERISTIC,
            scan_timeout: Duration::from_secs(default_scan_timeout_secs()),
            connect_timeout: Duration::from_secs(default_connect_timeout_secs()),
            disconnect_timeout: Duration::from_secs(default_disconnect_timeout_secs()),
            write_timeout: Duration::from_secs(default_write_timeout_secs()),
            quiescence: Duration::from_secs(default_quiescence_secs()),
            measurement_wait: Duration::from_secs(default_measurement_wait_secs()),
            notification_channel_capacity: default_notification_channel_capacity(),
            monitor_interval: Duration::from_millis(default_monitor_interval_ms()),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file
    /// is missing or unreadable
    pub fn load_from(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BiosensorLink");
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
