//! Discovery Scanner Module
//!
//! Finds printers on each transport:
//!
//! - Classic: the adapter's bonded devices, returned immediately.
//! - BLE: a time-bounded advertisement scan, named devices only.
//! - USB: attached devices of the printer class.

use crate::domain::models::{Device, MessageSeverity, PrinterEvent, StatusMessage, TransportKind};
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::transport::{ClassicAdapter, GattCentral};
use crate::infrastructure::usb::UsbEnumerator;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Scanner over every configured backend.
///
/// Scans take `&mut self`, so two scans never share the result buffers.
pub struct DiscoveryScanner {
    classic: Option<Arc<dyn ClassicAdapter>>,
    central: Option<Arc<dyn GattCentral>>,
    usb: Option<Arc<dyn UsbEnumerator>>,
    scan_window: Duration,
    seen: HashSet<String>,
    found: Vec<Device>,
    event_sender: mpsc::UnboundedSender<PrinterEvent>,
}

impl DiscoveryScanner {
    pub fn new(
        classic: Option<Arc<dyn ClassicAdapter>>,
        central: Option<Arc<dyn GattCentral>>,
        usb: Option<Arc<dyn UsbEnumerator>>,
        scan_window: Duration,
        event_sender: mpsc::UnboundedSender<PrinterEvent>,
    ) -> Self {
        Self {
            classic,
            central,
            usb,
            scan_window,
            seen: HashSet::new(),
            found: Vec::new(),
            event_sender,
        }
    }

    pub async fn scan(&mut self, transport: TransportKind) -> BridgeResult<Vec<Device>> {
        match transport {
            TransportKind::Classic => self.bonded().await,
            TransportKind::Ble => self.scan_ble().await,
            TransportKind::Usb => self.usb_printers(),
        }
    }

    async fn bonded(&self) -> BridgeResult<Vec<Device>> {
        let adapter = self.classic.as_ref().ok_or(BridgeError::BluetoothDisabled)?;
        adapter
            .adapter_state()
            .await
            .check()
            .map_err(|_| BridgeError::BluetoothDisabled)?;

        let bonded = adapter
            .bonded_devices()
            .await
            .map_err(BridgeError::connection)?;
        info!("{} bonded devices", bonded.len());

        let devices: Vec<Device> = bonded
            .into_iter()
            .map(|b| Device::new(b.name, b.address, TransportKind::Classic))
            .collect();
        for device in &devices {
            let _ = self.event_sender.send(PrinterEvent::DeviceFound(device.clone()));
        }
        Ok(devices)
    }

    /// Collect advertisements until the scan window closes.
    #[instrument(skip(self), fields(window_ms = self.scan_window.as_millis() as u64))]
    async fn scan_ble(&mut self) -> BridgeResult<Vec<Device>> {
        let central = self.central.clone().ok_or(BridgeError::BluetoothDisabled)?;
        central
            .adapter_state()
            .await
            .check()
            .map_err(|_| BridgeError::BluetoothDisabled)?;

        self.seen.clear();
        self.found.clear();

        info!("Starting BLE scan");
        self.send_log("Scanning for printers...", MessageSeverity::Info);

        let mut advertisements = central.start_scan().await.map_err(BridgeError::connection)?;
        let deadline = Instant::now() + self.scan_window;

        loop {
            let advertisement = match tokio::time::timeout_at(deadline, advertisements.recv()).await {
                Ok(Some(advertisement)) => advertisement,
                Ok(None) => {
                    debug!("Advertisement stream ended before the window closed");
                    break;
                }
                Err(_) => break,
            };

            let name = match advertisement.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };
            if !self.seen.insert(advertisement.address.to_ascii_uppercase()) {
                continue;
            }

            debug!(
                "Found {} at {} (rssi {:?})",
                name, advertisement.address, advertisement.rssi
            );
            let device = Device::new(name, advertisement.address, TransportKind::Ble);
            let _ = self.event_sender.send(PrinterEvent::DeviceFound(device.clone()));
            self.found.push(device);
        }

        central.stop_scan().await;
        info!("Scan finished, {} printers", self.found.len());
        self.send_log("Scan stopped.", MessageSeverity::Info);

        Ok(std::mem::take(&mut self.found))
    }

    fn usb_printers(&self) -> BridgeResult<Vec<Device>> {
        let Some(usb) = self.usb.as_ref() else {
            return Ok(Vec::new());
        };
        let attached = usb.enumerate().map_err(BridgeError::connection)?;

        Ok(attached
            .iter()
            .filter(|d| d.is_printer())
            .map(|d| d.to_device())
            .collect())
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
    use crate::infrastructure::bluetooth::mock::{MockCentral, MockClassicAdapter, MockPrinter, MockUsbBus};
    use crate::infrastructure::bluetooth::transport::AdapterState;

    fn scanner(
        classic: Option<Arc<MockClassicAdapter>>,
        central: Option<Arc<MockCentral>>,
    ) -> (DiscoveryScanner, mpsc::UnboundedReceiver<PrinterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scanner = DiscoveryScanner::new(
            classic.map(|c| c as Arc<dyn ClassicAdapter>),
            central.map(|c| c as Arc<dyn GattCentral>),
            Some(Arc::new(MockUsbBus::with_sample_devices()) as Arc<dyn UsbEnumerator>),
            Duration::from_secs(5),
            tx,
        );
        (scanner, rx)
    }

    #[tokio::test]
    async fn test_classic_returns_bonded_devices() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        let (mut scanner, _rx) = scanner(Some(classic), None);

        let identities: Vec<String> = scanner
            .scan(TransportKind::Classic)
            .await
            .unwrap()
            .iter()
            .map(Device::identity)
            .collect();
        assert_eq!(
            identities,
            vec!["Printer-X#AA:BB:CC:DD:EE:FF", "Printer-Y#11:22:33:44:55:66"]
        );
    }

    #[tokio::test]
    async fn test_classic_scan_with_radio_off() {
        let classic = Arc::new(MockClassicAdapter::with_sample_printers());
        classic.set_adapter_state(AdapterState::Disabled);
        let (mut scanner, _rx) = scanner(Some(classic), None);

        let err = scanner.scan(TransportKind::Classic).await.unwrap_err();
        assert_eq!(err, BridgeError::BluetoothDisabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_scan_dedupes_and_skips_unnamed() {
        let central = Arc::new(MockCentral::with_sample_printers());
        let (mut scanner, mut rx) = scanner(None, Some(central.clone()));

        let start = Instant::now();
        let devices = scanner.scan(TransportKind::Ble).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Printer-BLE");
        assert!(!central.is_scanning());

        let mut found = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PrinterEvent::DeviceFound(_)) {
                found += 1;
            }
        }
        assert_eq!(found, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_scans_do_not_mix() {
        let central = Arc::new(MockCentral::with_sample_printers());
        let (mut scanner, _rx) = scanner(None, Some(central.clone()));

        let first = scanner.scan(TransportKind::Ble).await.unwrap();
        central.remove_printer(&first[0].address);
        central.add_printer(MockPrinter::ble("Label-2", "9A7B-22"));
        let second = scanner.scan(TransportKind::Ble).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "Label-2");
        assert_eq!(central.scans_started(), 2);
    }

    #[tokio::test]
    async fn test_usb_lists_only_printers() {
        let (mut scanner, _rx) = scanner(None, None);
        let devices = scanner.scan(TransportKind::Usb).await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "TM-T20II");
        assert!(devices[0].connected);
    }
}
