//! Device registry
//!
//! Holds the devices found by the most recent scan of each transport.
//! Nothing here is persisted.

use crate::domain::models::{Device, TransportKind};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry of `transport` with a fresh scan result.
    ///
    /// The connection flag of a device that is still the active connection
    /// survives the replacement.
    pub fn replace(&mut self, transport: TransportKind, devices: Vec<Device>) {
        let connected: Option<String> = self
            .devices
            .iter()
            .find(|d| d.transport == transport && d.connected)
            .map(|d| d.address.clone());

        self.devices.retain(|d| d.transport != transport);

        for mut device in devices {
            if self.find(&device.address).is_some() {
                continue;
            }
            if transport != TransportKind::Usb {
                device.connected = connected
                    .as_deref()
                    .map(|addr| device.same_address(addr))
                    .unwrap_or(false);
            }
            self.devices.push(device);
        }
    }

    pub fn find(&self, address: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.same_address(address))
    }

    pub fn list(&self, transport: TransportKind) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|d| d.transport == transport)
            .cloned()
            .collect()
    }

    /// Mark `address` as the only connected Bluetooth device, or clear all
    /// Bluetooth connection flags with `None`.
    pub fn set_connected(&mut self, address: Option<&str>) {
        for device in self.devices.iter_mut().filter(|d| d.transport.is_bluetooth()) {
            device.connected = address.map(|a| device.same_address(a)).unwrap_or(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printers() -> Vec<Device> {
        vec![
            Device::new("Printer-X", "AA:BB:CC:DD:EE:FF", TransportKind::Classic),
            Device::new("Printer-Y", "11:22:33:44:55:66", TransportKind::Classic),
        ]
    }

    #[test]
    fn test_replace_discards_previous_scan() {
        let mut registry = DeviceRegistry::new();
        registry.replace(TransportKind::Classic, printers());
        registry.replace(
            TransportKind::Ble,
            vec![Device::new("BLE", "uuid-1", TransportKind::Ble)],
        );
        registry.replace(
            TransportKind::Classic,
            vec![Device::new("Printer-Z", "00:11:22:33:44:55", TransportKind::Classic)],
        );

        assert_eq!(registry.list(TransportKind::Classic).len(), 1);
        assert_eq!(registry.list(TransportKind::Ble).len(), 1);
        assert!(registry.find("AA:BB:CC:DD:EE:FF").is_none());
        assert!(registry.find("uuid-1").is_some());
    }

    #[test]
    fn test_lookup_ignores_case_and_tracks_connection() {
        let mut registry = DeviceRegistry::new();
        registry.replace(TransportKind::Classic, printers());

        registry.set_connected(Some("aa:bb:cc:dd:ee:ff"));
        assert!(registry.find("AA:BB:CC:DD:EE:FF").unwrap().connected);
        assert!(!registry.find("11:22:33:44:55:66").unwrap().connected);

        // A rescan keeps the flag on the live connection.
        registry.replace(TransportKind::Classic, printers());
        assert!(registry.find("AA:BB:CC:DD:EE:FF").unwrap().connected);

        registry.set_connected(None);
        assert!(registry.list(TransportKind::Classic).iter().all(|d| !d.connected));
    }

    #[test]
    fn test_duplicate_addresses_collapse() {
        let mut registry = DeviceRegistry::new();
        let mut devices = printers();
        devices.push(Device::new("Again", "aa:bb:cc:dd:ee:ff", TransportKind::Classic));
        registry.replace(TransportKind::Classic, devices);
        assert_eq!(registry.list(TransportKind::Classic).len(), 2);
    }
}
