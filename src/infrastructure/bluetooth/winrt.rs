//! WinRT BLE central
//!
//! Scans with `BluetoothLEAdvertisementWatcher` and talks GATT through
//! `BluetoothLEDevice`. Addresses cross the boundary as `AA:BB:CC:DD:EE:FF`
//! strings; WinRT takes the 48-bit integer.

use crate::infrastructure::bluetooth::protocol::{format_mac, normalize_uuid, parse_mac};
use crate::infrastructure::bluetooth::transport::{
    AdapterState, Advertisement, CharacteristicProperties, GattCentral, GattCharacteristic,
    GattPeripheral, GattService, TransportError, TransportResult, WriteKind,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinCharacteristic, GattCharacteristicProperties,
    GattCommunicationStatus, GattDeviceService, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataWriter;

fn platform(e: windows::core::Error) -> TransportError {
    TransportError::Platform(e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn guid_string(guid: GUID) -> String {
    normalize_uuid(&format!("{:?}", guid))
}

#[derive(Default)]
pub struct WinRtCentral {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
}

impl WinRtCentral {
    pub fn new() -> Self {
        Self::default()
    }

    async fn radio_state() -> windows::core::Result<AdapterState> {
        let adapter = match BluetoothAdapter::GetDefaultAsync()?.await {
            Ok(adapter) => adapter,
            Err(_) => return Ok(AdapterState::Unavailable),
        };
        if !adapter.IsLowEnergySupported()? {
            return Ok(AdapterState::Unavailable);
        }

        let radio = adapter.GetRadioAsync()?.await?;
        Ok(match radio.State()? {
            RadioState::On => AdapterState::Enabled,
            _ => AdapterState::Disabled,
        })
    }
}

#[async_trait]
impl GattCentral for WinRtCentral {
    async fn adapter_state(&self) -> AdapterState {
        Self::radio_state().await.unwrap_or_else(|e| {
            warn!("Error reading radio state: {}", e);
            AdapterState::Unavailable
        })
    }

    async fn start_scan(&self) -> TransportResult<mpsc::UnboundedReceiver<Advertisement>> {
        self.stop_scan().await;

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(platform)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(platform)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let _ = tx.send(Advertisement {
                        address: format_mac(args.BluetoothAddress()?),
                        name: (!name.is_empty()).then_some(name),
                        rssi: args.RawSignalStrengthInDBm().ok(),
                    });
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(platform)?;
        watcher.Start().map_err(platform)?;
        info!("Advertisement watcher started");
        *lock(&self.watcher) = Some(watcher);

        Ok(rx)
    }

    async fn stop_scan(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            if let Err(e) = watcher.Stop() {
                warn!("Error stopping watcher: {}", e);
            }
        }
    }

    async fn connect(&self, address: &str) -> TransportResult<Box<dyn GattPeripheral>> {
        let raw = parse_mac(address).map_err(|e| TransportError::Platform(e.to_string()))?;
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)
            .map_err(platform)?
            .await
            .map_err(|_| TransportError::DeviceNotFound(address.to_string()))?;

        // WinRT links lazily; an uncached service query forces the link up.
        let result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)
            .map_err(platform)?
            .await
            .map_err(platform)?;
        let status = result.Status().map_err(platform)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!("service query returned {:?}", status)));
        }

        let services: Vec<GattDeviceService> = result.Services().map_err(platform)?.into_iter().collect();
        info!("Connected to {} ({} services)", address, services.len());

        Ok(Box::new(WinRtPeripheral {
            address: address.to_string(),
            device,
            services: Mutex::new(services),
            characteristics: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct WinRtPeripheral {
    address: String,
    device: BluetoothLEDevice,
    services: Mutex<Vec<GattDeviceService>>,
    characteristics: Mutex<Vec<(GattCharacteristic, WinCharacteristic)>>,
    closed: AtomicBool,
}

impl WinRtPeripheral {
    fn find_service(&self, uuid: &str) -> Option<GattDeviceService> {
        lock(&self.services)
            .iter()
            .find(|s| s.Uuid().map(guid_string).is_ok_and(|u| u == uuid))
            .cloned()
    }

    fn find_characteristic(&self, characteristic: &GattCharacteristic) -> Option<WinCharacteristic> {
        lock(&self.characteristics)
            .iter()
            .find(|(known, _)| known == characteristic)
            .map(|(_, native)| native.clone())
    }
}

fn properties(flags: GattCharacteristicProperties) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(GattCharacteristicProperties::Read),
        write: flags.contains(GattCharacteristicProperties::Write),
        write_without_response: flags.contains(GattCharacteristicProperties::WriteWithoutResponse),
        notify: flags.contains(GattCharacteristicProperties::Notify),
    }
}

#[async_trait]
impl GattPeripheral for WinRtPeripheral {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self
                .device
                .ConnectionStatus()
                .map(|s| s == BluetoothConnectionStatus::Connected)
                .unwrap_or(false)
    }

    async fn discover_services(&self) -> TransportResult<Vec<GattService>> {
        lock(&self.services)
            .iter()
            .map(|s| {
                Ok(GattService {
                    uuid: guid_string(s.Uuid().map_err(platform)?),
                })
            })
            .collect()
    }

    async fn discover_characteristics(
        &self,
        service: &GattService,
    ) -> TransportResult<Vec<GattCharacteristic>> {
        let native = self
            .find_service(&service.uuid)
            .ok_or_else(|| TransportError::Gatt(format!("unknown service {}", service.uuid)))?;

        let result = native
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)
            .map_err(platform)?
            .await
            .map_err(platform)?;
        let status = result.Status().map_err(platform)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!(
                "characteristic query on {} returned {:?}",
                service.uuid, status
            )));
        }

        let mut found = Vec::new();
        for c in result.Characteristics().map_err(platform)? {
            let characteristic = GattCharacteristic {
                service_uuid: service.uuid.clone(),
                uuid: guid_string(c.Uuid().map_err(platform)?),
                properties: properties(c.CharacteristicProperties().map_err(platform)?),
            };
            debug!("{} / {} {:?}", characteristic.service_uuid, characteristic.uuid, characteristic.properties);
            found.push((characteristic, c));
        }

        let listed = found.iter().map(|(c, _)| c.clone()).collect();
        lock(&self.characteristics).extend(found);
        Ok(listed)
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        kind: WriteKind,
    ) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::LinkClosed);
        }
        let native = self
            .find_characteristic(characteristic)
            .ok_or(TransportError::NoWritableCharacteristic)?;

        let writer = DataWriter::new().map_err(platform)?;
        writer.WriteBytes(data).map_err(platform)?;
        let buffer = writer.DetachBuffer().map_err(platform)?;

        let option = match kind {
            WriteKind::WithResponse => GattWriteOption::WriteWithResponse,
            WriteKind::WithoutResponse => GattWriteOption::WriteWithoutResponse,
        };
        let status = native
            .WriteValueWithOptionAsync(&buffer, option)
            .map_err(platform)?
            .await
            .map_err(platform)?;

        match status {
            GattCommunicationStatus::Success => Ok(()),
            other => Err(TransportError::Gatt(format!("write returned {:?}", other))),
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.characteristics).clear();
        for service in lock(&self.services).drain(..) {
            let _ = service.Close();
        }
        self.device.Close().map_err(platform)
    }
}
