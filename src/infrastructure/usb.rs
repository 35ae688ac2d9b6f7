//! USB printer enumeration
//!
//! Read-only: USB printers are listed so the host can hand them to a spooler,
//! they are never opened here.

use crate::domain::models::{Device, TransportKind};
use crate::infrastructure::bluetooth::transport::{TransportError, TransportResult};
use tracing::debug;

/// USB base class for printers.
pub const PRINTER_CLASS: u8 = 0x07;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub bus_number: u8,
    pub device_address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub interface_classes: Vec<u8>,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
}

impl UsbDeviceInfo {
    /// Printer class on the device descriptor or on any interface (composite
    /// devices declare class 0 and put the printer on an interface).
    pub fn is_printer(&self) -> bool {
        self.class == PRINTER_CLASS || self.interface_classes.contains(&PRINTER_CLASS)
    }

    /// `bus:device`, unique among attached devices.
    pub fn bus_address(&self) -> String {
        format!("{:03}:{:03}", self.bus_number, self.device_address)
    }

    pub fn display_name(&self) -> String {
        match (&self.product, &self.manufacturer) {
            (Some(product), _) if !product.trim().is_empty() => product.trim().to_string(),
            (_, Some(vendor)) if !vendor.trim().is_empty() => format!("{} USB Printer", vendor.trim()),
            _ => format!("USB Printer {:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }

    /// Presence on the bus counts as connected.
    pub fn to_device(&self) -> Device {
        let mut device = Device::new(self.display_name(), self.bus_address(), TransportKind::Usb);
        device.connected = true;
        device
    }
}

pub trait UsbEnumerator: Send + Sync {
    /// Every device currently attached, printer or not.
    fn enumerate(&self) -> TransportResult<Vec<UsbDeviceInfo>>;
}

/// Enumerates the host bus through `nusb`.
#[derive(Debug, Default)]
pub struct NusbEnumerator;

impl NusbEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl UsbEnumerator for NusbEnumerator {
    fn enumerate(&self) -> TransportResult<Vec<UsbDeviceInfo>> {
        let devices = nusb::list_devices().map_err(|e| TransportError::Platform(e.to_string()))?;

        let infos: Vec<UsbDeviceInfo> = devices
            .map(|d| UsbDeviceInfo {
                bus_number: d.bus_number(),
                device_address: d.device_address(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                class: d.class(),
                interface_classes: d.interfaces().map(|i| i.class()).collect(),
                product: d.product_string().map(str::to_string),
                manufacturer: d.manufacturer_string().map(str::to_string),
            })
            .collect();

        debug!("USB bus lists {} devices", infos.len());
        Ok(infos)
    }
}
