//! Printer Service Module
//!
//! Main service that coordinates permissions, discovery, the connection and
//! chunked writes. Every state-changing call goes through one async mutex,
//! so a second `connect` or write queues behind the first.

use crate::domain::models::{Device, PrinterEvent, TransportKind};
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::{BackendKind, Settings};
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::connection::{ConnectionConfig, ConnectionManager};
use crate::infrastructure::bluetooth::mock::{
    MockCentral, MockClassicAdapter, MockHost, MockRadio, MockUsbBus,
};
use crate::infrastructure::bluetooth::scanner::DiscoveryScanner;
use crate::infrastructure::bluetooth::transport::{AdapterState, ClassicAdapter, GattCentral};
use crate::infrastructure::bluetooth::writer::{bytes_from_values, ChunkedWriter, WriteReport};
use crate::infrastructure::platform::{DesktopHost, PermissionModel, PlatformHost};
use crate::infrastructure::usb::{NusbEnumerator, UsbEnumerator};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// The platform pieces a service runs on.
pub struct Backends {
    pub classic: Option<Arc<dyn ClassicAdapter>>,
    pub central: Option<Arc<dyn GattCentral>>,
    pub usb: Option<Arc<dyn UsbEnumerator>>,
    pub host: Arc<dyn PlatformHost>,
}

impl Backends {
    pub fn for_settings(settings: &Settings) -> Self {
        match settings.backend {
            BackendKind::Native => Self::native(settings),
            BackendKind::Simulated => Self::simulated(),
        }
    }

    /// Host radios. Classic goes through the bonded serial ports listed in
    /// the settings; BLE is available where a native central exists.
    pub fn native(settings: &Settings) -> Self {
        let classic = crate::infrastructure::bluetooth::classic::SerialPortAdapter::from_settings(settings);

        #[cfg(windows)]
        let central: Option<Arc<dyn GattCentral>> =
            Some(Arc::new(crate::infrastructure::bluetooth::winrt::WinRtCentral::new()));
        #[cfg(not(windows))]
        let central: Option<Arc<dyn GattCentral>> = None;

        Self {
            classic: Some(Arc::new(classic)),
            central,
            usb: Some(Arc::new(NusbEnumerator::new())),
            host: Arc::new(DesktopHost::new()),
        }
    }

    /// In-process printers: Printer-X and Printer-Y over Classic, one BLE
    /// printer and one USB printer.
    pub fn simulated() -> Self {
        let radio = MockRadio::default();
        let classic = MockClassicAdapter::with_radio(radio.clone());
        for printer in MockClassicAdapter::with_sample_printers().printers() {
            classic.add_printer(printer);
        }
        let central = MockCentral::with_radio(radio.clone());
        for printer in MockCentral::with_sample_printers().printers() {
            central.add_printer(printer);
        }

        Self {
            classic: Some(Arc::new(classic)),
            central: Some(Arc::new(central)),
            usb: Some(Arc::new(MockUsbBus::with_sample_devices())),
            host: Arc::new(MockHost::new(PermissionModel::NotRequired).with_radio(radio)),
        }
    }
}

struct ServiceState {
    registry: DeviceRegistry,
    manager: ConnectionManager,
    scanner: DiscoveryScanner,
}

/// Main printer service coordinating all bridge operations
pub struct PrinterService {
    state: Mutex<ServiceState>,
    writer: ChunkedWriter,
    classic: Option<Arc<dyn ClassicAdapter>>,
    central: Option<Arc<dyn GattCentral>>,
    host: Arc<dyn PlatformHost>,
}

impl PrinterService {
    pub fn new(
        backends: Backends,
        settings: &Settings,
        event_sender: mpsc::UnboundedSender<PrinterEvent>,
    ) -> Self {
        let manager = ConnectionManager::new(
            backends.classic.clone(),
            backends.central.clone(),
            ConnectionConfig::from_settings(settings),
            event_sender.clone(),
        );
        let scanner = DiscoveryScanner::new(
            backends.classic.clone(),
            backends.central.clone(),
            backends.usb,
            settings.ble_scan_window(),
            event_sender,
        );

        Self {
            state: Mutex::new(ServiceState {
                registry: DeviceRegistry::new(),
                manager,
                scanner,
            }),
            writer: ChunkedWriter::new(settings.chunk_size, settings.inter_chunk_delay()),
            classic: backends.classic,
            central: backends.central,
            host: backends.host,
        }
    }

    pub fn platform_version(&self) -> String {
        self.host.platform_version()
    }

    /// Make sure the platform's Bluetooth permissions are granted, prompting
    /// through the host when some are missing.
    pub async fn check_permissions(&self) -> BridgeResult<bool> {
        let requested = self.host.permission_model().requested();
        if self.host.permission_state().await.all_granted(requested) {
            return Ok(true);
        }
        if !self.host.has_foreground() {
            return Err(BridgeError::ActivityNotAvailable);
        }

        info!("Requesting Bluetooth permissions");
        self.host.request_permissions(requested).await
    }

    /// Pre-check run before every Bluetooth operation. Never prompts.
    async fn ensure_permissions(&self) -> BridgeResult<()> {
        let gating = self.host.permission_model().gating();
        if self.host.permission_state().await.all_granted(gating) {
            Ok(())
        } else {
            Err(BridgeError::PermissionDenied)
        }
    }

    /// Combined radio state; enabled if any backend radio is on.
    pub async fn adapter_state(&self) -> AdapterState {
        let mut states = Vec::with_capacity(2);
        if let Some(classic) = &self.classic {
            states.push(classic.adapter_state().await);
        }
        if let Some(central) = &self.central {
            states.push(central.adapter_state().await);
        }

        if states.contains(&AdapterState::Enabled) {
            AdapterState::Enabled
        } else if states.contains(&AdapterState::Disabled) {
            AdapterState::Disabled
        } else {
            AdapterState::Unavailable
        }
    }

    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.adapter_state().await == AdapterState::Enabled
    }

    /// Turn the radio on, asking the user through the host if needed.
    pub async fn enable_bluetooth(&self) -> BridgeResult<bool> {
        match self.adapter_state().await {
            AdapterState::Unavailable => Err(BridgeError::BluetoothNotAvailable),
            AdapterState::Enabled => Ok(true),
            AdapterState::Disabled => {
                if !self.host.has_foreground() {
                    return Err(BridgeError::ActivityNotAvailable);
                }
                info!("Asking the user to enable Bluetooth");
                self.host.request_enable_adapter().await
            }
        }
    }

    /// Discover printers on `transport`. Discovery failures are logged and
    /// reported as an empty list.
    pub async fn list_devices(&self, transport: TransportKind) -> BridgeResult<Vec<Device>> {
        if transport.is_bluetooth() {
            self.ensure_permissions().await?;
        }

        let mut state = self.state.lock().await;
        let devices = match state.scanner.scan(transport).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("{} discovery failed: {}", transport, e);
                Vec::new()
            }
        };

        let ServiceState {
            registry, manager, ..
        } = &mut *state;
        manager.drop_dead_link().await;
        registry.replace(transport, devices);
        registry.set_connected(manager.active_device().map(|d| d.address.as_str()));

        Ok(registry.list(transport))
    }

    /// Bonded Classic printers, or a BLE scan where no Classic adapter
    /// exists.
    pub async fn list_bluetooth(&self) -> BridgeResult<Vec<Device>> {
        let transport = if self.classic.is_some() {
            TransportKind::Classic
        } else {
            TransportKind::Ble
        };
        self.list_devices(transport).await
    }

    pub async fn connect(&self, address: &str) -> BridgeResult<bool> {
        self.ensure_permissions().await?;

        let address = address.trim();
        if address.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "Device address is required".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let ServiceState {
            registry, manager, ..
        } = &mut *state;

        let target = match registry.find(address) {
            Some(device) => device.clone(),
            None => {
                let transport = manager.config().default_transport;
                info!("{} not in registry, trying {}", address, transport);
                Device::new("", address, transport)
            }
        };

        let result = manager.connect(&target).await;
        registry.set_connected(manager.active_device().map(|d| d.address.as_str()));
        result.map(|_| true)
    }

    pub async fn write_bytes(&self, values: &[i64]) -> BridgeResult<WriteReport> {
        self.ensure_permissions().await?;
        let payload = bytes_from_values(values)?;

        let mut state = self.state.lock().await;
        let ServiceState {
            registry, manager, ..
        } = &mut *state;

        let result = manager.write(&self.writer, &payload).await;
        if !manager.is_connected() {
            registry.set_connected(None);
        }
        result
    }

    /// Send `text` as UTF-8 over the active link.
    pub async fn write_text(&self, text: &str) -> BridgeResult<WriteReport> {
        self.ensure_permissions().await?;

        let mut state = self.state.lock().await;
        let ServiceState {
            registry, manager, ..
        } = &mut *state;

        let result = manager.write(&self.writer, text.as_bytes()).await;
        if !manager.is_connected() {
            registry.set_connected(None);
        }
        result
    }

    /// Always succeeds.
    pub async fn disconnect(&self) -> bool {
        let mut state = self.state.lock().await;
        state.manager.disconnect().await;
        state.registry.set_connected(None);
        true
    }

    /// Transport link state. The address is accepted for compatibility and
    /// only logged when it differs from the active device.
    pub async fn is_connected(&self, address: Option<&str>) -> bool {
        let mut state = self.state.lock().await;
        if let (Some(address), Some(active)) = (address, state.manager.active_device()) {
            if !active.same_address(address) {
                info!(
                    "isConnected asked about {}, active link is {}",
                    address, active.address
                );
            }
        }

        let ServiceState {
            registry, manager, ..
        } = &mut *state;
        if !manager.drop_dead_link().await {
            registry.set_connected(None);
        }
        manager.is_connected()
    }
}
