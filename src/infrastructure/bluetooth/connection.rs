//! Printer Connection Module
//!
//! Owns the single active printer link and sequences
//! `Idle -> Connecting -> (Resolving) -> Connected -> Idle`.

use crate::domain::models::{
    ConnectionState, Device, MessageSeverity, PrinterEvent, StatusMessage, TransportKind,
};
use crate::domain::settings::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::protocol::SPP_UUID;
use crate::infrastructure::bluetooth::selection::CharacteristicSelector;
use crate::infrastructure::bluetooth::transport::{
    ClassicAdapter, GattCentral, GattCharacteristic, GattPeripheral, Link, SppSocket,
    TransportError, TransportResult, WriteKind, WriteMode,
};
use crate::infrastructure::bluetooth::writer::{ChunkedWriter, WriteReport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Pause after tearing down a Classic socket before opening the next one
    pub classic_settle_delay: Duration,
    /// How long a BLE link may take to come up
    pub ble_connect_timeout: Duration,
    /// Transport used for addresses not in the device registry
    pub default_transport: TransportKind,
    /// Picks the BLE byte-sink after characteristic discovery
    pub selector: CharacteristicSelector,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            classic_settle_delay: settings.classic_settle_delay(),
            ble_connect_timeout: settings.ble_connect_timeout(),
            default_transport: settings.default_transport,
            selector: CharacteristicSelector::from_settings(settings),
        }
    }
}

/// Classic link: a serial-profile stream. Writes are not acknowledged.
pub struct SppLink {
    socket: Box<dyn SppSocket>,
}

impl SppLink {
    pub fn new(socket: Box<dyn SppSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Link for SppLink {
    fn write_mode(&self) -> WriteMode {
        WriteMode::FireAndForget
    }

    fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> TransportResult<()> {
        self.socket.write_all(chunk).await?;
        self.socket.flush().await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.socket.close().await
    }
}

/// BLE link: a connected peripheral plus the characteristic print data goes
/// to, if one was resolved.
pub struct GattLink {
    peripheral: Box<dyn GattPeripheral>,
    sink: Option<GattCharacteristic>,
}

impl GattLink {
    pub fn new(peripheral: Box<dyn GattPeripheral>, sink: Option<GattCharacteristic>) -> Self {
        Self { peripheral, sink }
    }
}

#[async_trait]
impl Link for GattLink {
    fn write_mode(&self) -> WriteMode {
        WriteMode::Confirmed
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_connected()
    }

    fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> TransportResult<()> {
        let sink = self
            .sink
            .as_ref()
            .ok_or(TransportError::NoWritableCharacteristic)?;
        self.peripheral
            .write(sink, chunk, WriteKind::WithResponse)
            .await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.sink = None;
        self.peripheral.disconnect().await
    }
}

struct ActiveConnection {
    device: Device,
    link: Box<dyn Link>,
}

/// Connection manager. At most one link is alive at any time.
pub struct ConnectionManager {
    classic: Option<Arc<dyn ClassicAdapter>>,
    central: Option<Arc<dyn GattCentral>>,
    config: ConnectionConfig,
    active: Option<ActiveConnection>,
    state: ConnectionState,
    event_sender: mpsc::UnboundedSender<PrinterEvent>,
}

impl ConnectionManager {
    pub fn new(
        classic: Option<Arc<dyn ClassicAdapter>>,
        central: Option<Arc<dyn GattCentral>>,
        config: ConnectionConfig,
        event_sender: mpsc::UnboundedSender<PrinterEvent>,
    ) -> Self {
        Self {
            classic,
            central,
            config,
            active: None,
            state: ConnectionState::Idle,
            event_sender,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn active_device(&self) -> Option<&Device> {
        self.active.as_ref().map(|a| &a.device)
    }

    /// Transport-level link state. A BLE link without a writable
    /// characteristic still counts as connected.
    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.link.is_connected())
            .unwrap_or(false)
    }

    /// Tear down a link the remote side already dropped, so the state and
    /// the active device agree with [`Self::is_connected`]. Returns whether
    /// a link is still up.
    pub async fn drop_dead_link(&mut self) -> bool {
        match &self.active {
            Some(active) if !active.link.is_connected() => {
                warn!("Link to {} was closed by the remote side", active.device.identity());
                self.disconnect().await;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Connect to `target`, tearing down any existing link first.
    pub async fn connect(&mut self, target: &Device) -> BridgeResult<()> {
        self.disconnect().await;

        info!(
            "Connecting to {} over {}",
            target.identity(),
            target.transport
        );
        self.send_log(
            &format!("Connecting to {}...", target.name),
            MessageSeverity::Info,
        );
        self.set_state(ConnectionState::Connecting);

        let result = match target.transport {
            TransportKind::Classic => self.open_classic(&target.address).await,
            TransportKind::Ble => self.open_ble(&target.address).await,
            TransportKind::Usb => Err(BridgeError::ConnectionError(
                "USB printers are discovery-only".to_string(),
            )),
        };

        match result {
            Ok(link) => {
                let mut device = target.clone();
                device.connected = true;
                self.active = Some(ActiveConnection { device, link });
                self.set_state(ConnectionState::Connected);
                self.send_log("Connection established!", MessageSeverity::Success);
                Ok(())
            }
            Err(e) => {
                error!("Error connecting to {}: {}", target.address, e);
                self.send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn open_classic(&self, address: &str) -> BridgeResult<Box<dyn Link>> {
        let adapter = self.classic.as_ref().ok_or(BridgeError::BluetoothDisabled)?;
        adapter
            .adapter_state()
            .await
            .check()
            .map_err(BridgeError::connection)?;

        // Give the radio time to release the previous socket.
        if !self.config.classic_settle_delay.is_zero() {
            tokio::time::sleep(self.config.classic_settle_delay).await;
        }

        adapter.cancel_discovery().await;

        let socket = adapter
            .open(address, SPP_UUID)
            .await
            .map_err(BridgeError::connection)?;
        info!("Serial socket open to {}", address);

        Ok(Box::new(SppLink::new(socket)))
    }

    async fn open_ble(&mut self, address: &str) -> BridgeResult<Box<dyn Link>> {
        let central = self
            .central
            .clone()
            .ok_or(BridgeError::BluetoothDisabled)?;
        central
            .adapter_state()
            .await
            .check()
            .map_err(BridgeError::connection)?;

        // Link-up and sink resolution share one window.
        let window = self.config.ble_connect_timeout;
        let deadline = Instant::now() + window;
        let timed_out = || BridgeError::connection(TransportError::Timeout(window.as_millis() as u64));

        let peripheral = match tokio::time::timeout_at(deadline, central.connect(address)).await {
            Ok(Ok(peripheral)) => peripheral,
            Ok(Err(e)) => return Err(BridgeError::connection(e)),
            Err(_) => {
                warn!("Link to {} not up within {} ms", address, window.as_millis());
                return Err(timed_out());
            }
        };
        info!("Link up to {}, resolving services", peripheral.address());

        self.set_state(ConnectionState::Resolving);
        let sink = match tokio::time::timeout_at(deadline, self.resolve_sink(peripheral.as_ref())).await {
            Ok(sink) => sink,
            Err(_) => {
                warn!("Services of {} not resolved within {} ms", address, window.as_millis());
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Error disconnecting: {}", e);
                }
                return Err(timed_out());
            }
        };

        match &sink {
            Some(c) => info!("Using characteristic {} of service {}", c.uuid, c.service_uuid),
            None => {
                warn!("No writable characteristic found on {}", address);
                self.send_log(
                    "Connected, but the printer exposes no writable characteristic",
                    MessageSeverity::Warning,
                );
            }
        }

        Ok(Box::new(GattLink::new(peripheral, sink)))
    }

    /// Discover every service, then every characteristic of each, and let
    /// the selector pick the sink.
    async fn resolve_sink(&self, peripheral: &dyn GattPeripheral) -> Option<GattCharacteristic> {
        let services = match peripheral.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                error!("Error discovering services: {}", e);
                return None;
            }
        };
        info!("Found {} services", services.len());

        let mut candidates = Vec::new();
        for service in services.iter().filter(|s| self.config.selector.wants_service(s)) {
            match peripheral.discover_characteristics(service).await {
                Ok(characteristics) => {
                    debug!(
                        "Service {} has {} characteristics",
                        service.uuid,
                        characteristics.len()
                    );
                    candidates.extend(characteristics);
                }
                Err(e) => warn!("Error discovering characteristics of {}: {}", service.uuid, e),
            }
        }

        self.config.selector.select(&candidates).cloned()
    }

    /// Send `payload` over the active link. A failed chunk tears the link
    /// down.
    pub async fn write(&mut self, writer: &ChunkedWriter, payload: &[u8]) -> BridgeResult<WriteReport> {
        if !self.drop_dead_link().await {
            return Err(BridgeError::NotConnected);
        }
        let active = self.active.as_mut().ok_or(BridgeError::NotConnected)?;
        let result = writer.write(active.link.as_mut(), payload).await;

        match result {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Error writing bytes: {}", e);
                if matches!(e, BridgeError::WriteError(_)) {
                    self.disconnect().await;
                }
                Err(e)
            }
        }
    }

    /// Close the active link, if any. Never fails; teardown errors are
    /// logged and dropped.
    pub async fn disconnect(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!("Disconnecting from {}", active.device.identity());
            if let Err(e) = active.link.close().await {
                warn!("Error disconnecting: {}", e);
            }
            self.send_log("Disconnected from device", MessageSeverity::Info);
        }
        self.set_state(ConnectionState::Idle);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.event_sender.send(PrinterEvent::ConnectionStatus(state));
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(PrinterEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::{MockCentral, MockClassicAdapter, MockPrinter};
    use crate::infrastructure::bluetooth::transport::AdapterState;

    fn manager(
        classic: Option<Arc<MockClassicAdapter>>,
        central: Option<Arc<MockCentral>>,
    ) -> (ConnectionManager, mpsc::UnboundedReceiver<PrinterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            classic.map(|c| c as Arc<dyn ClassicAdapter>),
            central.map(|c| c as Arc<dyn GattCentral>),
            ConnectionConfig::default(),
            tx,
        );
        (manager, rx)
    }

    fn states(rx: &mut mpsc::UnboundedReceiver<PrinterEvent>) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PrinterEvent::ConnectionStatus(state) = event {
                out.push(state);
            }
        }
        out
    }

    fn classic_device(printer: &MockPrinter) -> Device {
        Device::new(&printer.name, &printer.address, TransportKind::Classic)
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let (mut manager, mut rx) = manager(None, None);
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(!manager.is_connected());
        assert!(states(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_write_before_connect_is_not_connected() {
        let (mut manager, _rx) = manager(None, None);
        let err = manager
            .write(&ChunkedWriter::default(), &[27, 64])
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classic_connect_settles_and_cancels_discovery() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        let printer = classic.printers()[0].clone();
        let (mut manager, mut rx) = manager(Some(classic.clone()), None);

        let start = tokio::time::Instant::now();
        manager.connect(&classic_device(&printer)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(classic.discovery_cancellations(), 1);
        assert!(manager.is_connected());
        assert!(manager.active_device().unwrap().connected);
        assert_eq!(
            states(&mut rx),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_tears_down_previous_link_first() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        let printers = classic.printers();
        let (mut manager, _rx) = manager(Some(classic.clone()), None);

        manager.connect(&classic_device(&printers[0])).await.unwrap();
        manager.connect(&classic_device(&printers[1])).await.unwrap();

        assert_eq!(classic.live_links(), 1);
        assert_eq!(classic.max_live_links(), 1);
        assert_eq!(
            manager.active_device().unwrap().address,
            printers[1].address
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_classic_address_is_connection_error() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        let (mut manager, _rx) = manager(Some(classic), None);

        let ghost = Device::new("", "00:00:00:00:00:00", TransportKind::Classic);
        let err = manager.connect(&ghost).await.unwrap_err();

        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert!(err.to_string().contains("device not found"));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disabled_adapter_is_reported() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        classic.set_adapter_state(AdapterState::Disabled);
        let printer = classic.printers()[0].clone();
        let (mut manager, _rx) = manager(Some(classic), None);

        let err = manager.connect(&classic_device(&printer)).await.unwrap_err();
        assert_eq!(err, BridgeError::BluetoothDisabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_connect_resolves_first_writable_characteristic() {
        let central = Arc::new(MockCentral::with_sample_printers());
        let printer = central.printers()[0].clone();
        let (mut manager, mut rx) = manager(None, Some(central.clone()));

        let device = Device::new(&printer.name, &printer.address, TransportKind::Ble);
        manager.connect(&device).await.unwrap();

        assert_eq!(
            states(&mut rx),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Resolving,
                ConnectionState::Connected
            ]
        );

        let report = manager
            .write(&ChunkedWriter::default(), &vec![0x1B; 1100])
            .await
            .unwrap();
        assert_eq!(report.delivery, WriteMode::Confirmed);
        assert_eq!(report.chunks, 3);
        assert_eq!(central.received(&printer.address), vec![0x1B; 1100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_connect_timeout_ignores_late_link() {
        let central = Arc::new(MockCentral::with_sample_printers());
        central.set_link_latency(Duration::from_secs(4));
        let printer = central.printers()[0].clone();
        let (mut manager, _rx) = manager(None, Some(central.clone()));

        let device = Device::new(&printer.name, &printer.address, TransportKind::Ble);
        let err = manager.connect(&device).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_ERROR");

        // Let the late link-up callback fire; it must not revive anything.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!manager.is_connected());
        assert_eq!(central.live_links(), 0);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_without_writable_characteristic_stays_linked() {
        let central = Arc::new(MockCentral::new());
        central.add_printer(MockPrinter::ble_read_only("Label-R", "5E0C-11"));
        let (mut manager, _rx) = manager(None, Some(central));

        let device = Device::new("Label-R", "5E0C-11", TransportKind::Ble);
        manager.connect(&device).await.unwrap();

        assert!(manager.is_connected());
        let err = manager
            .write(&ChunkedWriter::default(), &[27, 64])
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::NotConnected);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_tears_down_link() {
        let central = Arc::new(MockCentral::with_sample_printers());
        central.fail_write_at(Some(1));
        let printer = central.printers()[0].clone();
        let (mut manager, _rx) = manager(None, Some(central.clone()));

        let device = Device::new(&printer.name, &printer.address, TransportKind::Ble);
        manager.connect(&device).await.unwrap();

        let err = manager
            .write(&ChunkedWriter::default(), &vec![0u8; 2048])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WRITE_ERROR");
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(central.live_links(), 0);
        // Only the acknowledged first chunk arrived.
        assert_eq!(central.received(&printer.address).len(), 512);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_service_resolution_times_out() {
        let central = Arc::new(MockCentral::with_sample_printers());
        central.stall_discovery(true);
        let printer = central.printers()[0].clone();
        let (mut manager, mut rx) = manager(None, Some(central.clone()));

        let device = Device::new(&printer.name, &printer.address, TransportKind::Ble);
        let start = tokio::time::Instant::now();
        let err = manager.connect(&device).await.unwrap_err();

        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(central.live_links(), 0);
        assert_eq!(
            states(&mut rx),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Resolving,
                ConnectionState::Idle
            ]
        );

        // A responsive printer connects again afterwards.
        central.stall_discovery(false);
        manager.connect(&device).await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_classic_write_tears_down_link() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        classic.fail_write_at(Some(1));
        let printer = classic.printers()[0].clone();
        let (mut manager, _rx) = manager(Some(classic.clone()), None);

        manager.connect(&classic_device(&printer)).await.unwrap();
        let err = manager
            .write(&ChunkedWriter::default(), &vec![0x1B; 1100])
            .await
            .unwrap_err();

        assert_eq!(err.code(), "WRITE_ERROR");
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(classic.live_links(), 0);
        assert_eq!(classic.received(&printer.address).len(), 512);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_drop_resets_state() {
        let central = Arc::new(MockCentral::with_sample_printers());
        let printer = central.printers()[0].clone();
        let (mut manager, _rx) = manager(None, Some(central.clone()));

        let device = Device::new(&printer.name, &printer.address, TransportKind::Ble);
        manager.connect(&device).await.unwrap();
        assert!(manager.drop_dead_link().await);

        central.drop_link(&printer.address);
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Connected);

        let err = manager
            .write(&ChunkedWriter::default(), &[27, 64])
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::NotConnected);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.active_device().is_none());
        assert_eq!(central.live_links(), 0);
    }

    #[tokio::test]
    async fn test_usb_is_not_connectable() {
        let (mut manager, _rx) = manager(None, None);
        let device = Device::new("USB", "001:004", TransportKind::Usb);
        let err = manager.connect(&device).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_ERROR");
    }
}
