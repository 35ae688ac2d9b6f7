use serde::{Deserialize, Serialize};
use std::fmt;

/// Medium used to reach a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Classic,
    Ble,
    Usb,
}

impl TransportKind {
    /// Value of the `type` field in device records.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Classic | Self::Ble => "bluetooth",
            Self::Usb => "usb",
        }
    }

    pub fn is_bluetooth(&self) -> bool {
        !matches!(self, Self::Usb)
    }

    /// Parse a `printerType` argument. Accepts the historical "bluethoot"
    /// spelling as well.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "classic" | "spp" => Some(Self::Classic),
            "ble" | "bluetooth" | "bluethoot" => Some(Self::Ble),
            "usb" => Some(Self::Usb),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classic => "classic",
            Self::Ble => "ble",
            Self::Usb => "usb",
        };
        f.write_str(name)
    }
}

/// A printer seen by discovery. Identity is the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub address: String,
    pub transport: TransportKind,
    pub connected: bool,
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            transport,
            connected: false,
        }
    }

    /// Display identity `name#address`.
    pub fn identity(&self) -> String {
        format!("{}#{}", self.name, self.address)
    }

    /// Split a `name#address` identity. The address is everything after the
    /// last `#`, so names may contain `#`.
    pub fn parse_identity(identity: &str) -> Option<(&str, &str)> {
        let (name, address) = identity.rsplit_once('#')?;
        if name.is_empty() || address.is_empty() {
            return None;
        }
        Some((name, address))
    }

    pub fn same_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }

    pub fn to_record(&self) -> DeviceRecord {
        let address = Some(self.address.clone());
        let (mac_address, ble_address, usb_address) = match self.transport {
            TransportKind::Classic => (address, None, None),
            TransportKind::Ble => (None, address, None),
            TransportKind::Usb => (None, None, address),
        };
        DeviceRecord {
            id: self.identity(),
            name: self.name.clone(),
            mac_address,
            ble_address,
            usb_address,
            device_type: self.transport.wire_type().to_string(),
            is_connected: self.connected,
        }
    }
}

/// Wire form of a discovered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ble_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_address: Option<String>,
    #[serde(rename = "type")]
    pub device_type: String,
    pub is_connected: bool,
}

/// Connection manager state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    /// BLE only: link is up, services and characteristics are being resolved.
    Resolving,
    Connected,
}

#[derive(Debug, Clone)]
pub enum PrinterEvent {
    ConnectionStatus(ConnectionState),
    DeviceFound(Device),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_round_trip() {
        let device = Device::new("Printer-X", "AA:BB:CC:DD:EE:FF", TransportKind::Classic);
        assert_eq!(device.identity(), "Printer-X#AA:BB:CC:DD:EE:FF");
        assert_eq!(
            Device::parse_identity("Kitchen #2#11:22:33:44:55:66"),
            Some(("Kitchen #2", "11:22:33:44:55:66"))
        );
        assert_eq!(Device::parse_identity("no-separator"), None);
        assert_eq!(Device::parse_identity("#AA"), None);
    }

    #[test]
    fn test_record_uses_transport_specific_field() {
        let mut device = Device::new("P", "1234-ABCD", TransportKind::Ble);
        device.connected = true;
        let json = serde_json::to_value(device.to_record()).unwrap();
        assert_eq!(json["bleAddress"], "1234-ABCD");
        assert_eq!(json["type"], "bluetooth");
        assert_eq!(json["isConnected"], true);
        assert!(json.get("macAddress").is_none());

        let usb = Device::new("USB", "001:004", TransportKind::Usb).to_record();
        assert_eq!(usb.usb_address.as_deref(), Some("001:004"));
        assert_eq!(usb.device_type, "usb");
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!(TransportKind::parse("bluethoot"), Some(TransportKind::Ble));
        assert_eq!(TransportKind::parse("USB"), Some(TransportKind::Usb));
        assert_eq!(TransportKind::parse("classic"), Some(TransportKind::Classic));
        assert_eq!(TransportKind::parse("serial"), None);
    }
}
