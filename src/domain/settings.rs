use crate::domain::models::TransportKind;
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
    "thermal_printer_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which backends the bridge drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host radios, serial ports and USB bus.
    Native,
    /// In-process printers for demos and integration checks.
    Simulated,
}

/// How the BLE byte-sink is picked after characteristic discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// First characteristic, in discovery order, that supports "write".
    FirstWritable,
    /// First writable characteristic listed in the allow-lists.
    AllowList,
}

/// A Classic printer bonded with the host, reachable through a serial port
/// node (`/dev/rfcomm0`, `/dev/tty.Printer-SerialPort`, `COM5`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondedDevice {
    pub name: String,
    pub address: String,
    pub port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_socket_name")]
    pub socket_name: String,

    // Transfer Settings
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,

    // Connection Settings
    #[serde(default = "default_transport")]
    pub default_transport: TransportKind,
    #[serde(default = "default_classic_settle_delay_ms")]
    pub classic_settle_delay_ms: u64,
    #[serde(default = "default_ble_connect_timeout_ms")]
    pub ble_connect_timeout_ms: u64,
    #[serde(default = "default_ble_scan_window_ms")]
    pub ble_scan_window_ms: u64,

    // GATT Selection Settings
    #[serde(default = "default_selection_strategy")]
    pub gatt_selection: SelectionStrategy,
    #[serde(default)]
    pub gatt_service_uuids: Vec<String>,
    #[serde(default)]
    pub gatt_characteristic_uuids: Vec<String>,

    // Classic Settings
    #[serde(default)]
    pub bonded_devices: Vec<BondedDevice>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            backend: default_backend(),
            socket_name: default_socket_name(),
            chunk_size: default_chunk_size(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
            default_transport: default_transport(),
            classic_settle_delay_ms: default_classic_settle_delay_ms(),
            ble_connect_timeout_ms: default_ble_connect_timeout_ms(),
            ble_scan_window_ms: default_ble_scan_window_ms(),
            gatt_selection: default_selection_strategy(),
            gatt_service_uuids: Vec::new(),
            gatt_characteristic_uuids: Vec::new(),
            bonded_devices: Vec::new(),
        }
    }
}

impl Settings {
    pub fn classic_settle_delay(&self) -> Duration {
        Duration::from_millis(self.classic_settle_delay_ms)
    }

    pub fn ble_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ble_connect_timeout_ms.min(MAX_WINDOW_MS))
    }

    pub fn ble_scan_window(&self) -> Duration {
        Duration::from_millis(self.ble_scan_window_ms.min(MAX_WINDOW_MS))
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

/// Upper bound for the BLE connect and scan windows.
const MAX_WINDOW_MS: u64 = 10 * 60 * 1000;

fn default_backend() -> BackendKind {
    BackendKind::Native
}
fn default_socket_name() -> String {
    "thermal-printer-bridge.sock".to_string()
}
fn default_chunk_size() -> usize {
    512
}
fn default_inter_chunk_delay_ms() -> u64 {
    10
}
fn default_transport() -> TransportKind {
    if cfg!(windows) {
        TransportKind::Ble
    } else {
        TransportKind::Classic
    }
}
fn default_classic_settle_delay_ms() -> u64 {
    500
}
fn default_ble_connect_timeout_ms() -> u64 {
    3000
}
fn default_ble_scan_window_ms() -> u64 {
    5000
}
fn default_selection_strategy() -> SelectionStrategy {
    SelectionStrategy::FirstWritable
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

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({}): {}", settings_path.display(), e);
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
        path.push("ThermalPrinterBridge");
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

    pub fn add_bonded_device(&mut self, device: BondedDevice) -> anyhow::Result<()> {
        let exists = self
            .settings
            .bonded_devices
            .iter()
            .any(|d| d.address.eq_ignore_ascii_case(&device.address));
        if !exists {
            self.settings.bonded_devices.push(device);
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_transfer_constants() {
        let settings = Settings::default();
        assert_eq!(settings.chunk_size, 512);
        assert_eq!(settings.classic_settle_delay(), Duration::from_millis(500));
        assert_eq!(settings.ble_connect_timeout(), Duration::from_secs(3));
        assert_eq!(settings.ble_scan_window(), Duration::from_secs(5));
        assert_eq!(settings.gatt_selection, SelectionStrategy::FirstWritable);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{"ble_connect_timeout_ms": 5000, "gatt_selection": "allow_list"}"#,
        )
        .unwrap();
        assert_eq!(settings.ble_connect_timeout_ms, 5000);
        assert_eq!(settings.gatt_selection, SelectionStrategy::AllowList);
        assert_eq!(settings.chunk_size, 512);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_huge_windows_are_clamped() {
        let settings: Settings = serde_json::from_str(
            r#"{"ble_connect_timeout_ms": 18446744073709551615, "ble_scan_window_ms": 18446744073709551615}"#,
        )
        .unwrap();
        assert_eq!(settings.ble_scan_window(), Duration::from_secs(600));
        assert_eq!(settings.ble_connect_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service
            .add_bonded_device(BondedDevice {
                name: "Printer-X".into(),
                address: "AA:BB:CC:DD:EE:FF".into(),
                port: "/dev/rfcomm0".into(),
            })
            .unwrap();
        // Same address again is ignored.
        service
            .add_bonded_device(BondedDevice {
                name: "Other".into(),
                address: "aa:bb:cc:dd:ee:ff".into(),
                port: "/dev/rfcomm1".into(),
            })
            .unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(reloaded.get().bonded_devices.len(), 1);
        assert_eq!(reloaded.get().bonded_devices[0].port, "/dev/rfcomm0");
    }

    #[test]
    fn test_unreadable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().socket_name, "thermal-printer-bridge.sock");
    }
}
