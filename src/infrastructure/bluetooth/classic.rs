//! Classic adapter over serial-port nodes
//!
//! Bonded printers are bound to a serial port by the OS (`rfcomm bind` on
//! Linux, an outgoing COM port on Windows, `/dev/tty.*` on macOS). The
//! adapter opens that node and streams print data into it.

use crate::domain::settings::{BondedDevice, Settings};
use crate::infrastructure::bluetooth::transport::{
    AdapterState, BondedInfo, ClassicAdapter, SppSocket, TransportError, TransportResult,
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct SerialPortAdapter {
    bonded: Vec<BondedDevice>,
    sysfs_root: PathBuf,
}

impl SerialPortAdapter {
    pub fn new(bonded: Vec<BondedDevice>) -> Self {
        Self {
            bonded,
            sysfs_root: PathBuf::from("/sys/class/bluetooth"),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.bonded_devices.clone())
    }

    /// Directory listing the host controllers. Only consulted on Linux.
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    fn find(&self, address: &str) -> Option<&BondedDevice> {
        self.bonded
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address))
    }
}

#[async_trait]
impl ClassicAdapter for SerialPortAdapter {
    async fn adapter_state(&self) -> AdapterState {
        if !cfg!(target_os = "linux") {
            return AdapterState::Enabled;
        }

        let mut entries = match tokio::fs::read_dir(&self.sysfs_root).await {
            Ok(entries) => entries,
            Err(_) => return AdapterState::Unavailable,
        };
        match entries.next_entry().await {
            Ok(Some(_)) => AdapterState::Enabled,
            _ => AdapterState::Disabled,
        }
    }

    async fn bonded_devices(&self) -> TransportResult<Vec<BondedInfo>> {
        Ok(self
            .bonded
            .iter()
            .map(|d| BondedInfo {
                name: d.name.clone(),
                address: d.address.clone(),
            })
            .collect())
    }

    async fn cancel_discovery(&self) {
        // Inquiry is owned by the OS stack behind the port.
        debug!("No discovery to cancel on serial-port adapter");
    }

    async fn open(&self, address: &str, service_uuid: &str) -> TransportResult<Box<dyn SppSocket>> {
        let device = self
            .find(address)
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?;

        info!(
            "Opening {} for {} (service {})",
            device.port, device.address, service_uuid
        );
        let file = OpenOptions::new().write(true).open(&device.port).await?;

        Ok(Box::new(SerialSocket { file: Some(file) }))
    }
}

struct SerialSocket {
    file: Option<File>,
}

#[async_trait]
impl SppSocket for SerialSocket {
    fn is_connected(&self) -> bool {
        self.file.is_some()
    }

    async fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        let file = self.file.as_mut().ok_or(TransportError::LinkClosed)?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> TransportResult<()> {
        let file = self.file.as_mut().ok_or(TransportError::LinkClosed)?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bonded(port: &std::path::Path) -> BondedDevice {
        BondedDevice {
            name: "Printer-X".to_string(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            port: port.to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn test_streams_into_port_node() {
        let dir = tempfile::tempdir().unwrap();
        let port = dir.path().join("rfcomm0");
        std::fs::write(&port, b"").unwrap();

        let adapter = SerialPortAdapter::new(vec![bonded(&port)]);
        let mut socket = adapter
            .open("aa:bb:cc:dd:ee:ff", crate::infrastructure::bluetooth::protocol::SPP_UUID)
            .await
            .unwrap();
        socket.write_all(&[27, 64]).await.unwrap();
        socket.flush().await.unwrap();
        socket.close().await.unwrap();

        assert!(!socket.is_connected());
        assert_eq!(std::fs::read(&port).unwrap(), vec![27, 64]);
    }

    #[tokio::test]
    async fn test_unbonded_address_is_not_found() {
        let adapter = SerialPortAdapter::new(Vec::new());
        let err = adapter.open("00:00:00:00:00:00", "").await.err().unwrap();
        assert!(matches!(err, TransportError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_lists_bonded_devices_from_settings() {
        let settings = Settings {
            bonded_devices: vec![bonded(std::path::Path::new("/dev/rfcomm0"))],
            ..Settings::default()
        };
        let listed = SerialPortAdapter::from_settings(&settings)
            .bonded_devices()
            .await
            .unwrap();
        assert_eq!(listed[0].name, "Printer-X");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_adapter_state_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SerialPortAdapter::new(Vec::new()).with_sysfs_root(dir.path());
        assert_eq!(adapter.adapter_state().await, AdapterState::Disabled);

        std::fs::create_dir(dir.path().join("hci0")).unwrap();
        assert_eq!(adapter.adapter_state().await, AdapterState::Enabled);

        let missing = SerialPortAdapter::new(Vec::new()).with_sysfs_root(dir.path().join("none"));
        assert_eq!(missing.adapter_state().await, AdapterState::Unavailable);
    }
}
